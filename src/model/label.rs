//! Label and attribute definitions.
//!
//! Labels are owned by the session; annotation objects only reference them
//! by id. A [`LabelSet`] validates the label tree once on construction so the
//! rest of the engine can rely on unique ids and attribute names.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::AnnotationError;
use crate::model::shape::{ObjectType, ShapeType};

/// Which kind of object a label may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Any,
    Rectangle,
    Polygon,
    Polyline,
    Points,
    Ellipse,
    Cuboid,
    Skeleton,
    Tag,
}

impl LabelType {
    /// Whether an object of the given type/shape may carry a label of this type.
    pub fn accepts(self, object_type: ObjectType, shape_type: Option<ShapeType>) -> bool {
        match (self, object_type, shape_type) {
            (LabelType::Tag, ObjectType::Tag, _) => true,
            (LabelType::Tag, _, _) => false,
            (LabelType::Any, ObjectType::Tag, _) => true,
            (_, ObjectType::Tag, _) => false,
            (LabelType::Skeleton, _, Some(ShapeType::Skeleton)) => true,
            (LabelType::Skeleton, _, _) => false,
            (LabelType::Any, _, Some(ShapeType::Skeleton)) => false,
            (LabelType::Any, _, Some(_)) => true,
            (label, _, Some(shape)) => label.shape_type() == Some(shape),
            (_, _, None) => false,
        }
    }

    /// The single shape type this label is restricted to, if any.
    pub fn shape_type(self) -> Option<ShapeType> {
        match self {
            LabelType::Rectangle => Some(ShapeType::Rectangle),
            LabelType::Polygon => Some(ShapeType::Polygon),
            LabelType::Polyline => Some(ShapeType::Polyline),
            LabelType::Points => Some(ShapeType::Points),
            LabelType::Ellipse => Some(ShapeType::Ellipse),
            LabelType::Cuboid => Some(ShapeType::Cuboid),
            LabelType::Skeleton => Some(ShapeType::Skeleton),
            LabelType::Any | LabelType::Tag => None,
        }
    }
}

/// Input type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Text,
    Number,
    Checkbox,
    Radio,
    Select,
}

/// Attribute definition attached to a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Unique identifier
    pub id: u64,
    /// Display name, unique within the label
    pub name: String,
    /// How values are entered and validated
    pub input_type: AttributeType,
    /// Mutable attributes may change from keyframe to keyframe
    pub mutable: bool,
    /// Value used when an object doesn't set the attribute
    pub default_value: String,
    /// Allowed values; `[min, max, step]` for numbers
    #[serde(default)]
    pub values: Vec<String>,
}

impl AttributeSpec {
    /// Create an attribute definition.
    pub fn new(
        id: u64,
        name: impl Into<String>,
        input_type: AttributeType,
        default_value: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            input_type,
            mutable: false,
            default_value: default_value.into(),
            values: Vec::new(),
        }
    }

    /// Mark the attribute as mutable.
    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    /// Set the allowed values.
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// `(min, max, step)` for number attributes that declare them.
    pub fn number_range(&self) -> Option<(f64, f64, f64)> {
        if self.input_type != AttributeType::Number || self.values.len() < 2 {
            return None;
        }
        let min = self.values[0].trim().parse::<f64>().ok()?;
        let max = self.values[1].trim().parse::<f64>().ok()?;
        let step = self
            .values
            .get(2)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        Some((min, max, step))
    }

    /// Check that `value` is acceptable for this attribute.
    pub fn validate_value(&self, value: &str) -> Result<(), AnnotationError> {
        let ok = match self.input_type {
            AttributeType::Text => true,
            AttributeType::Checkbox => value == "true" || value == "false",
            AttributeType::Radio | AttributeType::Select => {
                self.values.is_empty() || self.values.iter().any(|v| v == value)
            }
            AttributeType::Number => match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => match self.number_range() {
                    Some((min, max, _)) => number >= min && number <= max,
                    None => true,
                },
                _ => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(AnnotationError::argument(format!(
                "Value '{}' is not valid for attribute '{}'",
                value, self.name
            )))
        }
    }
}

/// An annotation label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Unique identifier (unique across the whole label tree)
    pub id: u64,
    /// Display name
    pub name: String,
    /// RGB color
    pub color: [u8; 3],
    /// Object kinds this label may be used for
    #[serde(rename = "type")]
    pub label_type: LabelType,
    /// Ordered attribute definitions
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    /// Skeleton parts; only skeleton labels have sublabels
    #[serde(default)]
    pub sublabels: Vec<Label>,
    /// Whether this label is a sublabel of a skeleton
    #[serde(default)]
    pub has_parent: bool,
}

impl Label {
    /// Create a label with no attributes.
    pub fn new(id: u64, name: impl Into<String>, label_type: LabelType) -> Self {
        Self {
            id,
            name: name.into(),
            color: default_color(id),
            label_type,
            attributes: Vec::new(),
            sublabels: Vec::new(),
            has_parent: false,
        }
    }

    /// Set the color.
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    /// Add an attribute definition.
    pub fn with_attribute(mut self, attribute: AttributeSpec) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a skeleton part.
    pub fn with_sublabel(mut self, mut sublabel: Label) -> Self {
        sublabel.has_parent = true;
        self.sublabels.push(sublabel);
        self
    }

    /// Find an attribute definition by id.
    pub fn attribute(&self, id: u64) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.id == id)
    }

    /// Default values for every attribute of this label.
    pub fn default_attributes(&self) -> BTreeMap<u64, String> {
        self.attributes
            .iter()
            .map(|a| (a.id, a.default_value.clone()))
            .collect()
    }

    /// Validate an attribute map against this label's definitions.
    pub fn validate_attributes(
        &self,
        attributes: &BTreeMap<u64, String>,
    ) -> Result<(), AnnotationError> {
        for (id, value) in attributes {
            let spec = self.attribute(*id).ok_or_else(|| {
                AnnotationError::argument(format!(
                    "Attribute {} is not defined for label '{}'",
                    id, self.name
                ))
            })?;
            spec.validate_value(value)?;
        }
        Ok(())
    }

    /// Whether this is a skeleton label.
    pub fn is_skeleton(&self) -> bool {
        self.label_type == LabelType::Skeleton
    }
}

/// Golden-angle hue distribution for labels created without a color.
fn default_color(id: u64) -> [u8; 3] {
    let hue = (id as f64 * 137.5) % 360.0;
    let (r, g, b) = hsv_to_rgb(hue, 0.7, 0.9);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Convert HSV to RGB (h in degrees, s and v in 0-1).
fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (r + m, g + m, b + m)
}

/// The validated set of labels available in a session.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Validate and wrap a list of top-level labels.
    pub fn new(labels: Vec<Label>) -> Result<Self, AnnotationError> {
        let mut ids = HashSet::new();
        for label in &labels {
            Self::validate_label(label, &mut ids)?;
        }
        Ok(Self { labels })
    }

    fn validate_label(label: &Label, ids: &mut HashSet<u64>) -> Result<(), AnnotationError> {
        if !ids.insert(label.id) {
            return Err(AnnotationError::argument(format!(
                "Duplicate label id {}",
                label.id
            )));
        }

        let mut names = HashSet::new();
        for attribute in &label.attributes {
            if !names.insert(attribute.name.as_str()) {
                return Err(AnnotationError::argument(format!(
                    "Duplicate attribute '{}' in label '{}'",
                    attribute.name, label.name
                )));
            }
            attribute.validate_value(&attribute.default_value)?;
        }

        if !label.is_skeleton() && !label.sublabels.is_empty() {
            return Err(AnnotationError::argument(format!(
                "Label '{}' is not a skeleton but has sublabels",
                label.name
            )));
        }

        for sublabel in &label.sublabels {
            if sublabel.is_skeleton() {
                return Err(AnnotationError::argument(format!(
                    "Skeleton '{}' cannot contain another skeleton",
                    label.name
                )));
            }
            Self::validate_label(sublabel, ids)?;
        }
        Ok(())
    }

    /// Top-level labels.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Find a label (top-level or sublabel) by id.
    pub fn get(&self, id: u64) -> Option<&Label> {
        self.labels.iter().find_map(|label| {
            if label.id == id {
                Some(label)
            } else {
                label.sublabels.iter().find(|s| s.id == id)
            }
        })
    }

    /// Resolve a caller-provided label to the session's own definition.
    ///
    /// Fails if the id is unknown or the definition differs.
    pub fn resolve(&self, label: &Label) -> Result<&Label, AnnotationError> {
        match self.get(label.id) {
            Some(own) if own == label => Ok(own),
            _ => Err(AnnotationError::argument(format!(
                "Label '{}' ({}) does not belong to this session",
                label.name, label.id
            ))),
        }
    }

    /// Number of top-level labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
