//! Canonical annotation objects owned by the collection.
//!
//! Callers never hold these directly; they work on [`ObjectState`](super::ObjectState)
//! snapshots that refer back to an object by its [`ClientId`].

use std::collections::BTreeMap;

use crate::model::shape::{Geometry, Keyframe, ObjectType, ShapeType, Source};

/// Process-local identifier of an annotation object.
pub type ClientId = u64;

/// What an annotation object is, with its kind-specific data.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    /// A single-frame geometric annotation.
    Shape {
        frame: u64,
        shape_type: ShapeType,
        geometry: Geometry,
    },
    /// A multi-frame annotation defined at sparse keyframes.
    Track {
        shape_type: ShapeType,
        keyframes: BTreeMap<u64, Keyframe>,
    },
    /// A frame-level label without geometry.
    Tag { frame: u64 },
}

/// A persistent annotation entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationObject {
    /// Stable process-local identifier
    pub client_id: ClientId,
    /// Server-assigned id, absent until first save
    pub server_id: Option<u64>,
    pub label_id: u64,
    /// Group id, 0 = ungrouped
    pub group: u64,
    pub color: [u8; 3],
    pub source: Source,
    pub lock: bool,
    pub hidden: bool,
    pub pinned: bool,
    /// Attribute values; for tracks only the immutable ones
    pub attributes: BTreeMap<u64, String>,
    /// Tombstone: deleted locally, kept for undo and for the next sync
    pub removed: bool,
    pub kind: ObjectKind,
    /// Skeleton elements, one per sublabel
    pub elements: Vec<AnnotationObject>,
}

impl AnnotationObject {
    /// Create an unsaved object of the given kind.
    pub fn new(client_id: ClientId, label_id: u64, color: [u8; 3], kind: ObjectKind) -> Self {
        Self {
            client_id,
            server_id: None,
            label_id,
            group: 0,
            color,
            source: Source::Manual,
            lock: false,
            hidden: false,
            pinned: false,
            attributes: BTreeMap::new(),
            removed: false,
            kind,
            elements: Vec::new(),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self.kind {
            ObjectKind::Shape { .. } => ObjectType::Shape,
            ObjectKind::Track { .. } => ObjectType::Track,
            ObjectKind::Tag { .. } => ObjectType::Tag,
        }
    }

    pub fn shape_type(&self) -> Option<ShapeType> {
        match self.kind {
            ObjectKind::Shape { shape_type, .. } | ObjectKind::Track { shape_type, .. } => {
                Some(shape_type)
            }
            ObjectKind::Tag { .. } => None,
        }
    }

    pub fn is_skeleton(&self) -> bool {
        self.shape_type() == Some(ShapeType::Skeleton)
    }

    /// First frame the object appears on.
    pub fn first_frame(&self) -> u64 {
        match &self.kind {
            ObjectKind::Shape { frame, .. } | ObjectKind::Tag { frame } => *frame,
            ObjectKind::Track { keyframes, .. } => {
                keyframes.keys().next().copied().unwrap_or_default()
            }
        }
    }

    /// Keyframes of a track.
    pub fn keyframes(&self) -> Option<&BTreeMap<u64, Keyframe>> {
        match &self.kind {
            ObjectKind::Track { keyframes, .. } => Some(keyframes),
            _ => None,
        }
    }

    /// Mutable keyframes of a track.
    pub fn keyframes_mut(&mut self) -> Option<&mut BTreeMap<u64, Keyframe>> {
        match &mut self.kind {
            ObjectKind::Track { keyframes, .. } => Some(keyframes),
            _ => None,
        }
    }

    /// Find an element of a skeleton by its client id.
    pub fn element(&self, client_id: ClientId) -> Option<&AnnotationObject> {
        self.elements.iter().find(|e| e.client_id == client_id)
    }

    /// Find a mutable element of a skeleton by its client id.
    pub fn element_mut(&mut self, client_id: ClientId) -> Option<&mut AnnotationObject> {
        self.elements.iter_mut().find(|e| e.client_id == client_id)
    }

    /// Whether this object or any of its elements is known to the server.
    pub fn has_server_ids(&self) -> bool {
        self.server_id.is_some() || self.elements.iter().any(|e| e.has_server_ids())
    }

    /// Forget every server id (object, keyframes, elements).
    pub fn clear_server_ids(&mut self) {
        self.server_id = None;
        if let Some(keyframes) = self.keyframes_mut() {
            for keyframe in keyframes.values_mut() {
                keyframe.server_id = None;
            }
        }
        for element in &mut self.elements {
            element.clear_server_ids();
        }
    }

    /// Keep a skeleton track's own keyframes equal to the union of its
    /// elements' keyframes.
    pub fn sync_skeleton_keyframes(&mut self) {
        if !self.is_skeleton() || self.elements.is_empty() {
            return;
        }
        let frames: std::collections::BTreeSet<u64> = self
            .elements
            .iter()
            .filter_map(|e| e.keyframes())
            .flat_map(|k| k.keys().copied())
            .collect();

        let Some(keyframes) = self.keyframes_mut() else {
            return;
        };
        keyframes.retain(|frame, _| frames.contains(frame));
        for frame in frames {
            if keyframes.contains_key(&frame) {
                continue;
            }
            let z_order = keyframes
                .range(..frame)
                .next_back()
                .or_else(|| keyframes.range(frame..).next())
                .map_or(0, |(_, k)| k.geometry.z_order);
            let mut geometry = Geometry::new(Vec::new());
            geometry.z_order = z_order;
            keyframes.insert(frame, Keyframe::new(geometry));
        }
    }
}
