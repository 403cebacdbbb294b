//! annocore - client-side annotation engine for computer-vision labeling.
//!
//! Holds the annotations of one job or task in memory, serves per-frame
//! views of shapes, tracks and tags (tracks interpolated between keyframes),
//! records every edit for undo/redo, and synchronizes incrementally with a
//! remote annotations backend.
//!
//! The usual entry point is [`Session`], which owns a [`Collection`], an
//! [`AnnotationsSaver`] and a backend handle.

pub mod backend;
pub mod collection;
pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod history;
pub mod interpolation;
pub mod model;
pub mod session;
pub mod sync;

pub use backend::{AnnotationsBackend, JsonFileBackend, MemoryBackend, SessionKind, UpdateAction};
pub use collection::{ClearOptions, Collection, SelectResult, Statistics};
pub use config::{Aggregation, EngineConfig};
pub use error::{AnnotationError, ServerError};
pub use filter::FilterExpr;
pub use model::{ClientId, Label, LabelSet, ObjectState, ObjectType, ShapeType};
pub use session::{AutoSaveManager, Session};
pub use sync::{AnnotationsPayload, AnnotationsSaver, SaveReport, SaveStatus};
