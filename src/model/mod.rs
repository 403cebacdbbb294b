//! Annotation data model: labels, objects and the states callers edit.

mod label;
mod object;
mod shape;
mod state;

pub use label::{AttributeSpec, AttributeType, Label, LabelSet, LabelType};
pub use object::{AnnotationObject, ClientId, ObjectKind};
pub use shape::{Geometry, Keyframe, ObjectType, ShapeType, Source, normalize_rotation};
pub use state::{ObjectState, ObjectStateBuilder, UpdateFlags};
