//! Synchronization with a backend: wire payloads, conversion and saving.

mod convert;
mod payload;
mod saver;

pub use convert::{PayloadOrder, assign_shape_ids, assign_track_ids, from_payload, to_payload};
pub use payload::{
    AnnotationsPayload, AttributeValue, ShapePayload, TagPayload, TrackPayload,
    TrackedShapePayload,
};
pub use saver::{AnnotationsSaver, SaveReport, SaveStatus};
