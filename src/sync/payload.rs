//! Wire format of annotations exchanged with a backend.

use serde::{Deserialize, Serialize};

use crate::model::{ShapeType, Source};

/// All annotations of a task or job, as sent to and received from a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationsPayload {
    /// Server-side revision, bumped on every accepted write
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tags: Vec<TagPayload>,
    #[serde(default)]
    pub shapes: Vec<ShapePayload>,
    #[serde(default)]
    pub tracks: Vec<TrackPayload>,
}

impl AnnotationsPayload {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.shapes.is_empty() && self.tracks.is_empty()
    }

    /// Number of top-level objects.
    pub fn len(&self) -> usize {
        self.tags.len() + self.shapes.len() + self.tracks.len()
    }
}

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub spec_id: u64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub frame: u64,
    pub label_id: u64,
    #[serde(default)]
    pub group: u64,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub frame: u64,
    pub label_id: u64,
    #[serde(default)]
    pub group: u64,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub outside: bool,
    #[serde(default)]
    pub z_order: i64,
    #[serde(default)]
    pub rotation: f64,
    /// Skeleton elements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<ShapePayload>,
}

/// One keyframe of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedShapePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub frame: u64,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub outside: bool,
    #[serde(default)]
    pub z_order: i64,
    #[serde(default)]
    pub rotation: f64,
    /// Mutable attribute values set at this keyframe
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// First frame of the track
    pub frame: u64,
    pub label_id: u64,
    #[serde(default)]
    pub group: u64,
    #[serde(default)]
    pub source: Source,
    /// Immutable attribute values
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
    pub shapes: Vec<TrackedShapePayload>,
    /// Skeleton elements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<TrackPayload>,
}
