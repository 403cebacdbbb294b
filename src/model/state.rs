//! `ObjectState`: the snapshot callers read and edit.
//!
//! A state is produced by the collection for one object on one frame, or
//! built by the caller with [`ObjectStateBuilder`] before `put`. Setters
//! validate immediately and record what changed in [`UpdateFlags`]; nothing
//! reaches the canonical object until the state is saved through the
//! collection.

use std::collections::BTreeMap;

use crate::error::AnnotationError;
use crate::geometry::validate_points;
use crate::interpolation::KeyframeNav;
use crate::model::label::Label;
use crate::model::object::ClientId;
use crate::model::shape::{ObjectType, ShapeType, Source, normalize_rotation};

/// Which fields of an [`ObjectState`] were written since it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlags {
    pub label: bool,
    pub attributes: bool,
    pub points: bool,
    pub rotation: bool,
    pub occluded: bool,
    pub outside: bool,
    pub keyframe: bool,
    pub z_order: bool,
    pub lock: bool,
    pub hidden: bool,
    pub pinned: bool,
    pub color: bool,
}

impl UpdateFlags {
    /// Whether any field was written.
    pub fn any(&self) -> bool {
        *self != Self::default()
    }

    /// Whether a write changes the object on this frame only
    /// (as opposed to object-wide properties).
    pub fn touches_frame(&self) -> bool {
        self.points
            || self.rotation
            || self.occluded
            || self.outside
            || self.keyframe
            || self.z_order
    }
}

/// Snapshot of an annotation object on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub(crate) object_type: ObjectType,
    pub(crate) shape_type: Option<ShapeType>,
    pub(crate) client_id: Option<ClientId>,
    pub(crate) server_id: Option<u64>,
    pub(crate) parent_id: Option<ClientId>,
    pub(crate) frame: u64,
    pub(crate) label: Label,
    pub(crate) attributes: BTreeMap<u64, String>,
    pub(crate) elements: Vec<ObjectState>,
    pub(crate) points: Vec<f64>,
    pub(crate) rotation: f64,
    pub(crate) occluded: bool,
    pub(crate) outside: bool,
    pub(crate) keyframe: bool,
    pub(crate) interpolated: bool,
    pub(crate) z_order: i64,
    pub(crate) lock: bool,
    pub(crate) hidden: bool,
    pub(crate) pinned: bool,
    pub(crate) color: [u8; 3],
    pub(crate) group: u64,
    pub(crate) source: Source,
    pub(crate) keyframes: Option<KeyframeNav>,
    pub(crate) updated: UpdateFlags,
}

impl ObjectState {
    /// Start building a new state for `put`.
    pub fn builder(object_type: ObjectType, label: Label, frame: u64) -> ObjectStateBuilder {
        ObjectStateBuilder::new(object_type, label, frame)
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn shape_type(&self) -> Option<ShapeType> {
        self.shape_type
    }

    /// Client id of the canonical object, None until the state is put.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn server_id(&self) -> Option<u64> {
        self.server_id
    }

    /// Client id of the owning skeleton for element states.
    pub fn parent_id(&self) -> Option<ClientId> {
        self.parent_id
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn attributes(&self) -> &BTreeMap<u64, String> {
        &self.attributes
    }

    /// Skeleton elements, one per sublabel.
    pub fn elements(&self) -> &[ObjectState] {
        &self.elements
    }

    /// Mutable access to skeleton elements for editing them in place.
    pub fn elements_mut(&mut self) -> &mut [ObjectState] {
        &mut self.elements
    }

    /// Point array; for skeletons the concatenation of element points.
    pub fn points(&self) -> Vec<f64> {
        if self.shape_type == Some(ShapeType::Skeleton) {
            self.elements.iter().flat_map(|e| e.points()).collect()
        } else {
            self.points.clone()
        }
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn occluded(&self) -> bool {
        self.occluded
    }

    pub fn outside(&self) -> bool {
        self.outside
    }

    /// The frame is an explicit keyframe of the track.
    pub fn keyframe(&self) -> bool {
        self.keyframe
    }

    /// The geometry was computed between two keyframes.
    pub fn interpolated(&self) -> bool {
        self.interpolated
    }

    pub fn z_order(&self) -> i64 {
        self.z_order
    }

    pub fn lock(&self) -> bool {
        self.lock
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn group(&self) -> u64 {
        self.group
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Keyframe navigation for tracks.
    pub fn keyframes(&self) -> Option<KeyframeNav> {
        self.keyframes
    }

    pub fn updated(&self) -> &UpdateFlags {
        &self.updated
    }

    fn is_skeleton(&self) -> bool {
        self.shape_type == Some(ShapeType::Skeleton)
    }

    fn require_geometry(&self, field: &str) -> Result<(), AnnotationError> {
        if self.object_type == ObjectType::Tag {
            return Err(AnnotationError::argument(format!(
                "Tags have no {}",
                field
            )));
        }
        Ok(())
    }

    /// Change the label; attributes are reset to the new label's defaults.
    pub fn set_label(&mut self, label: Label) -> Result<(), AnnotationError> {
        if self.is_skeleton() || self.parent_id.is_some() || label.is_skeleton() {
            return Err(AnnotationError::argument(
                "The label of a skeleton or skeleton element cannot be changed",
            ));
        }
        if !label.label_type.accepts(self.object_type, self.shape_type) {
            return Err(AnnotationError::argument(format!(
                "Label '{}' cannot be used for this object",
                label.name
            )));
        }
        self.attributes = label.default_attributes();
        self.label = label;
        self.updated.label = true;
        self.updated.attributes = true;
        Ok(())
    }

    /// Set attribute values by attribute id; unknown ids are rejected.
    pub fn set_attributes(
        &mut self,
        attributes: BTreeMap<u64, String>,
    ) -> Result<(), AnnotationError> {
        self.label.validate_attributes(&attributes)?;
        self.attributes.extend(attributes);
        self.updated.attributes = true;
        Ok(())
    }

    /// Replace the geometry.
    ///
    /// Malformed arrays are rejected here; degenerate geometry is only
    /// detected on save, where it is silently discarded.
    pub fn set_points(&mut self, points: Vec<f64>) -> Result<(), AnnotationError> {
        self.require_geometry("points")?;
        let Some(shape_type) = self.shape_type else {
            return Err(AnnotationError::argument("Object has no shape type"));
        };

        if shape_type == ShapeType::Skeleton {
            let expected: usize = self.elements.iter().map(|e| e.points.len()).sum();
            if points.len() != expected {
                return Err(AnnotationError::argument(format!(
                    "Skeleton expects {} coordinates, got {}",
                    expected,
                    points.len()
                )));
            }
            let mut offset = 0;
            for element in &mut self.elements {
                let len = element.points.len();
                element.set_points(points[offset..offset + len].to_vec())?;
                offset += len;
            }
            self.updated.points = true;
            return Ok(());
        }

        validate_points(&points, shape_type)?;
        self.points = points;
        self.updated.points = true;
        Ok(())
    }

    /// Set the rotation in degrees.
    pub fn set_rotation(&mut self, rotation: f64) -> Result<(), AnnotationError> {
        self.require_geometry("rotation")?;
        if !rotation.is_finite() {
            return Err(AnnotationError::argument(format!(
                "Rotation must be a finite number, got {}",
                rotation
            )));
        }
        self.rotation = normalize_rotation(rotation);
        self.updated.rotation = true;
        Ok(())
    }

    pub fn set_z_order(&mut self, z_order: i64) -> Result<(), AnnotationError> {
        self.require_geometry("z order")?;
        self.z_order = z_order;
        self.updated.z_order = true;
        Ok(())
    }

    /// Mark the frame as a keyframe of the track (or remove it).
    pub fn set_keyframe(&mut self, keyframe: bool) -> Result<(), AnnotationError> {
        if self.object_type != ObjectType::Track {
            return Err(AnnotationError::argument(
                "Only tracks have keyframes",
            ));
        }
        self.keyframe = keyframe;
        self.updated.keyframe = true;
        for element in &mut self.elements {
            element.keyframe = keyframe;
            element.updated.keyframe = true;
        }
        Ok(())
    }

    pub fn set_occluded(&mut self, occluded: bool) -> Result<(), AnnotationError> {
        self.require_geometry("occluded flag")?;
        self.occluded = occluded;
        self.updated.occluded = true;
        for element in &mut self.elements {
            element.set_occluded(occluded)?;
        }
        Ok(())
    }

    pub fn set_outside(&mut self, outside: bool) -> Result<(), AnnotationError> {
        self.require_geometry("outside flag")?;
        self.outside = outside;
        self.updated.outside = true;
        for element in &mut self.elements {
            element.set_outside(outside)?;
        }
        Ok(())
    }

    /// Lock or unlock; skeleton locks cascade to every element.
    pub fn set_lock(&mut self, lock: bool) {
        self.lock = lock;
        self.updated.lock = true;
        for element in &mut self.elements {
            element.set_lock(lock);
        }
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
        self.updated.hidden = true;
        for element in &mut self.elements {
            element.set_hidden(hidden);
        }
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        self.updated.pinned = true;
    }

    pub fn set_color(&mut self, color: [u8; 3]) {
        self.color = color;
        self.updated.color = true;
    }
}

/// Builder for new object states.
#[derive(Debug, Clone)]
pub struct ObjectStateBuilder {
    object_type: ObjectType,
    label: Label,
    frame: u64,
    shape_type: Option<ShapeType>,
    points: Option<Vec<f64>>,
    rotation: f64,
    occluded: bool,
    outside: bool,
    z_order: i64,
    lock: bool,
    hidden: bool,
    pinned: bool,
    color: Option<[u8; 3]>,
    group: u64,
    source: Source,
    attributes: BTreeMap<u64, String>,
    elements: Vec<ObjectState>,
}

impl ObjectStateBuilder {
    pub fn new(object_type: ObjectType, label: Label, frame: u64) -> Self {
        Self {
            object_type,
            label,
            frame,
            shape_type: None,
            points: None,
            rotation: 0.0,
            occluded: false,
            outside: false,
            z_order: 0,
            lock: false,
            hidden: false,
            pinned: false,
            color: None,
            group: 0,
            source: Source::Manual,
            attributes: BTreeMap::new(),
            elements: Vec::new(),
        }
    }

    pub fn shape_type(mut self, shape_type: ShapeType) -> Self {
        self.shape_type = Some(shape_type);
        self
    }

    pub fn points(mut self, points: Vec<f64>) -> Self {
        self.points = Some(points);
        self
    }

    pub fn rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn occluded(mut self, occluded: bool) -> Self {
        self.occluded = occluded;
        self
    }

    pub fn outside(mut self, outside: bool) -> Self {
        self.outside = outside;
        self
    }

    pub fn z_order(mut self, z_order: i64) -> Self {
        self.z_order = z_order;
        self
    }

    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn group(mut self, group: u64) -> Self {
        self.group = group;
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn attribute(mut self, id: u64, value: impl Into<String>) -> Self {
        self.attributes.insert(id, value.into());
        self
    }

    /// Skeleton elements, built with the sublabels of the skeleton label.
    pub fn elements(mut self, elements: Vec<ObjectState>) -> Self {
        self.elements = elements;
        self
    }

    /// Validate and produce the state.
    pub fn build(self) -> Result<ObjectState, AnnotationError> {
        let is_tag = self.object_type == ObjectType::Tag;

        if is_tag && (self.shape_type.is_some() || self.points.is_some()) {
            return Err(AnnotationError::argument("Tags cannot have geometry"));
        }
        if !is_tag && self.shape_type.is_none() {
            return Err(AnnotationError::argument(
                "Shape type is required for shapes and tracks",
            ));
        }
        if !self.label.label_type.accepts(self.object_type, self.shape_type) {
            return Err(AnnotationError::argument(format!(
                "Label '{}' cannot be used for this object",
                self.label.name
            )));
        }
        if !self.rotation.is_finite() {
            return Err(AnnotationError::argument("Rotation must be a finite number"));
        }
        self.label.validate_attributes(&self.attributes)?;

        let is_skeleton = self.shape_type == Some(ShapeType::Skeleton);
        let points = self.points.unwrap_or_default();
        if let Some(shape_type) = self.shape_type {
            validate_points(&points, shape_type)?;
        }

        let mut elements = self.elements;
        if is_skeleton {
            validate_elements(&self.label, self.object_type, &elements)?;
            for element in &mut elements {
                element.frame = self.frame;
            }
        } else if !elements.is_empty() {
            return Err(AnnotationError::argument(
                "Only skeletons can have elements",
            ));
        }

        let mut attributes = self.label.default_attributes();
        attributes.extend(self.attributes);

        Ok(ObjectState {
            object_type: self.object_type,
            shape_type: self.shape_type,
            client_id: None,
            server_id: None,
            parent_id: None,
            frame: self.frame,
            color: self.color.unwrap_or(self.label.color),
            label: self.label,
            attributes,
            elements,
            points,
            rotation: normalize_rotation(self.rotation),
            occluded: self.occluded,
            outside: self.outside,
            keyframe: self.object_type == ObjectType::Track,
            interpolated: false,
            z_order: self.z_order,
            lock: self.lock,
            hidden: self.hidden,
            pinned: self.pinned,
            group: self.group,
            source: self.source,
            keyframes: None,
            updated: UpdateFlags::default(),
        })
    }
}

/// Skeleton elements must map one-to-one onto the label's sublabels.
fn validate_elements(
    label: &Label,
    object_type: ObjectType,
    elements: &[ObjectState],
) -> Result<(), AnnotationError> {
    if elements.is_empty() {
        return Err(AnnotationError::data(format!(
            "Skeleton '{}' requires elements",
            label.name
        )));
    }
    if elements.len() != label.sublabels.len() {
        return Err(AnnotationError::argument(format!(
            "Skeleton '{}' expects {} elements, got {}",
            label.name,
            label.sublabels.len(),
            elements.len()
        )));
    }
    for sublabel in &label.sublabels {
        let matches = elements.iter().filter(|e| e.label.id == sublabel.id).count();
        if matches != 1 {
            return Err(AnnotationError::argument(format!(
                "Skeleton '{}' expects exactly one '{}' element",
                label.name, sublabel.name
            )));
        }
    }
    if let Some(element) = elements
        .iter()
        .find(|e| e.object_type != object_type || e.shape_type == Some(ShapeType::Skeleton))
    {
        return Err(AnnotationError::argument(format!(
            "Element '{}' must be a plain {} of the skeleton",
            element.label.name,
            object_type.as_str()
        )));
    }
    Ok(())
}
