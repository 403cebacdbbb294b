//! Shape-level value types shared by shapes, track keyframes and payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Geometry kind of a shape or track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Polygon,
    Polyline,
    Points,
    Ellipse,
    Cuboid,
    Skeleton,
}

impl ShapeType {
    /// Name used on the wire and in filters.
    pub fn as_str(self) -> &'static str {
        match self {
            ShapeType::Rectangle => "rectangle",
            ShapeType::Polygon => "polygon",
            ShapeType::Polyline => "polyline",
            ShapeType::Points => "points",
            ShapeType::Ellipse => "ellipse",
            ShapeType::Cuboid => "cuboid",
            ShapeType::Skeleton => "skeleton",
        }
    }

    /// All shape types, in display order.
    pub fn all() -> &'static [ShapeType] {
        &[
            ShapeType::Rectangle,
            ShapeType::Polygon,
            ShapeType::Polyline,
            ShapeType::Points,
            ShapeType::Ellipse,
            ShapeType::Cuboid,
            ShapeType::Skeleton,
        ]
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of annotation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Shape,
    Track,
    Tag,
}

impl ObjectType {
    /// Name used in filters.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Shape => "shape",
            ObjectType::Track => "track",
            ObjectType::Tag => "tag",
        }
    }
}

/// Where an annotation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Manual,
    SemiAuto,
    Auto,
}

impl Source {
    /// Source after a manual edit: automatic annotations become semi-automatic.
    pub fn edited(self) -> Self {
        match self {
            Source::Auto => Source::SemiAuto,
            other => other,
        }
    }
}

/// Geometry and per-frame flags of a shape or keyframe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    /// Flat `[x0, y0, x1, y1, ...]` point array
    pub points: Vec<f64>,
    /// Rotation in degrees, normalized to `[0, 360)`
    pub rotation: f64,
    pub occluded: bool,
    pub outside: bool,
    pub z_order: i64,
}

impl Geometry {
    /// Create a visible, non-occluded geometry.
    pub fn new(points: Vec<f64>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }
}

/// Explicitly authored state of a track at one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Keyframe {
    /// Server-assigned id, if persisted
    pub server_id: Option<u64>,
    pub geometry: Geometry,
    /// Values of mutable attributes set at this keyframe
    pub attributes: BTreeMap<u64, String>,
}

impl Keyframe {
    /// Create an unsaved keyframe without attribute changes.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            server_id: None,
            geometry,
            attributes: BTreeMap::new(),
        }
    }
}

/// Normalize a rotation to `[0, 360)`.
pub fn normalize_rotation(rotation: f64) -> f64 {
    let r = rotation % 360.0;
    if r < 0.0 { r + 360.0 } else { r }
}
