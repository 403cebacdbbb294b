//! Conversion between canonical objects and the wire format.

use std::collections::BTreeMap;

use crate::collection::split_attributes;
use crate::error::AnnotationError;
use crate::model::{
    AnnotationObject, ClientId, Geometry, Keyframe, Label, LabelSet, ObjectKind,
};
use crate::sync::payload::{
    AnnotationsPayload, AttributeValue, ShapePayload, TagPayload, TrackPayload,
    TrackedShapePayload,
};

/// Client ids of the objects in a payload, in payload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadOrder {
    pub tags: Vec<ClientId>,
    pub shapes: Vec<ClientId>,
    pub tracks: Vec<ClientId>,
}

fn attributes_to_wire(attributes: &BTreeMap<u64, String>) -> Vec<AttributeValue> {
    attributes
        .iter()
        .map(|(spec_id, value)| AttributeValue {
            spec_id: *spec_id,
            value: value.clone(),
        })
        .collect()
}

fn attributes_from_wire(attributes: &[AttributeValue]) -> BTreeMap<u64, String> {
    attributes
        .iter()
        .map(|a| (a.spec_id, a.value.clone()))
        .collect()
}

// ============================================================================
// Objects -> payload
// ============================================================================

/// Serialize objects, remembering which client id went where.
pub fn to_payload<'a>(
    objects: impl IntoIterator<Item = &'a AnnotationObject>,
    version: u64,
) -> (AnnotationsPayload, PayloadOrder) {
    let mut payload = AnnotationsPayload {
        version,
        ..Default::default()
    };
    let mut order = PayloadOrder::default();

    for object in objects {
        match &object.kind {
            ObjectKind::Tag { frame } => {
                payload.tags.push(TagPayload {
                    id: object.server_id,
                    frame: *frame,
                    label_id: object.label_id,
                    group: object.group,
                    source: object.source,
                    attributes: attributes_to_wire(&object.attributes),
                });
                order.tags.push(object.client_id);
            }
            ObjectKind::Shape { .. } => {
                if let Some(shape) = shape_to_wire(object) {
                    payload.shapes.push(shape);
                    order.shapes.push(object.client_id);
                }
            }
            ObjectKind::Track { .. } => {
                if let Some(track) = track_to_wire(object) {
                    payload.tracks.push(track);
                    order.tracks.push(object.client_id);
                }
            }
        }
    }
    (payload, order)
}

fn shape_to_wire(object: &AnnotationObject) -> Option<ShapePayload> {
    let ObjectKind::Shape {
        frame,
        shape_type,
        geometry,
    } = &object.kind
    else {
        return None;
    };
    Some(ShapePayload {
        id: object.server_id,
        frame: *frame,
        label_id: object.label_id,
        group: object.group,
        source: object.source,
        attributes: attributes_to_wire(&object.attributes),
        shape_type: *shape_type,
        points: geometry.points.clone(),
        occluded: geometry.occluded,
        outside: geometry.outside,
        z_order: geometry.z_order,
        rotation: geometry.rotation,
        elements: object.elements.iter().filter_map(shape_to_wire).collect(),
    })
}

fn track_to_wire(object: &AnnotationObject) -> Option<TrackPayload> {
    let ObjectKind::Track {
        shape_type,
        keyframes,
    } = &object.kind
    else {
        return None;
    };
    let shapes = keyframes
        .iter()
        .map(|(frame, keyframe)| TrackedShapePayload {
            id: keyframe.server_id,
            frame: *frame,
            shape_type: *shape_type,
            points: keyframe.geometry.points.clone(),
            occluded: keyframe.geometry.occluded,
            outside: keyframe.geometry.outside,
            z_order: keyframe.geometry.z_order,
            rotation: keyframe.geometry.rotation,
            attributes: attributes_to_wire(&keyframe.attributes),
        })
        .collect();
    Some(TrackPayload {
        id: object.server_id,
        frame: object.first_frame(),
        label_id: object.label_id,
        group: object.group,
        source: object.source,
        attributes: attributes_to_wire(&object.attributes),
        shapes,
        elements: object.elements.iter().filter_map(track_to_wire).collect(),
    })
}

// ============================================================================
// Payload -> objects
// ============================================================================

/// Build canonical objects from a payload.
///
/// With `keep_server_ids` the objects mirror the server (initial fetch);
/// without, they are new local objects (import).
pub fn from_payload(
    payload: &AnnotationsPayload,
    labels: &LabelSet,
    keep_server_ids: bool,
    next_id: &mut impl FnMut() -> ClientId,
) -> Result<Vec<AnnotationObject>, AnnotationError> {
    let mut objects = Vec::with_capacity(payload.len());
    for tag in &payload.tags {
        let label = label_for(labels, tag.label_id)?;
        let mut object =
            AnnotationObject::new(next_id(), label.id, label.color, ObjectKind::Tag { frame: tag.frame });
        object.server_id = tag.id.filter(|_| keep_server_ids);
        object.group = tag.group;
        object.source = tag.source;
        object.attributes = with_defaults(label, attributes_from_wire(&tag.attributes));
        objects.push(object);
    }
    for shape in &payload.shapes {
        objects.push(shape_from_wire(shape, labels, keep_server_ids, next_id)?);
    }
    for track in &payload.tracks {
        objects.push(track_from_wire(track, labels, keep_server_ids, next_id)?);
    }
    Ok(objects)
}

fn label_for(labels: &LabelSet, label_id: u64) -> Result<&Label, AnnotationError> {
    labels
        .get(label_id)
        .ok_or_else(|| AnnotationError::data(format!("Unknown label id {} in annotations", label_id)))
}

fn with_defaults(label: &Label, attributes: BTreeMap<u64, String>) -> BTreeMap<u64, String> {
    let mut values = label.default_attributes();
    values.extend(attributes);
    values
}

fn shape_from_wire(
    shape: &ShapePayload,
    labels: &LabelSet,
    keep_server_ids: bool,
    next_id: &mut impl FnMut() -> ClientId,
) -> Result<AnnotationObject, AnnotationError> {
    let label = label_for(labels, shape.label_id)?;
    let geometry = Geometry {
        points: shape.points.clone(),
        rotation: shape.rotation,
        occluded: shape.occluded,
        outside: shape.outside,
        z_order: shape.z_order,
    };
    let mut object = AnnotationObject::new(
        next_id(),
        label.id,
        label.color,
        ObjectKind::Shape {
            frame: shape.frame,
            shape_type: shape.shape_type,
            geometry,
        },
    );
    object.server_id = shape.id.filter(|_| keep_server_ids);
    object.group = shape.group;
    object.source = shape.source;
    object.attributes = with_defaults(label, attributes_from_wire(&shape.attributes));
    for element in &shape.elements {
        object
            .elements
            .push(shape_from_wire(element, labels, keep_server_ids, next_id)?);
    }
    Ok(object)
}

fn track_from_wire(
    track: &TrackPayload,
    labels: &LabelSet,
    keep_server_ids: bool,
    next_id: &mut impl FnMut() -> ClientId,
) -> Result<AnnotationObject, AnnotationError> {
    let label = label_for(labels, track.label_id)?;
    let Some(shape_type) = track.shapes.first().map(|s| s.shape_type) else {
        return Err(AnnotationError::data(format!(
            "Track {:?} has no keyframes",
            track.id
        )));
    };

    let keyframes = track
        .shapes
        .iter()
        .map(|shape| {
            let keyframe = Keyframe {
                server_id: shape.id.filter(|_| keep_server_ids),
                geometry: Geometry {
                    points: shape.points.clone(),
                    rotation: shape.rotation,
                    occluded: shape.occluded,
                    outside: shape.outside,
                    z_order: shape.z_order,
                },
                attributes: attributes_from_wire(&shape.attributes),
            };
            (shape.frame, keyframe)
        })
        .collect();

    let mut object = AnnotationObject::new(
        next_id(),
        label.id,
        label.color,
        ObjectKind::Track {
            shape_type,
            keyframes,
        },
    );
    object.server_id = track.id.filter(|_| keep_server_ids);
    object.group = track.group;
    object.source = track.source;
    let attributes = with_defaults(label, attributes_from_wire(&track.attributes));
    object.attributes = split_attributes(label, attributes).0;
    for element in &track.elements {
        object
            .elements
            .push(track_from_wire(element, labels, keep_server_ids, next_id)?);
    }
    Ok(object)
}

// ============================================================================
// Id reconciliation
// ============================================================================

/// Copy server ids from an echoed shape onto the object it was sent for.
pub fn assign_shape_ids(object: &mut AnnotationObject, echoed: &ShapePayload) {
    object.server_id = echoed.id;
    for element in &mut object.elements {
        if let Some(wire) = echoed.elements.iter().find(|e| e.label_id == element.label_id) {
            assign_shape_ids(element, wire);
        }
    }
}

/// Copy server ids of a track and its keyframes from an echoed track.
pub fn assign_track_ids(object: &mut AnnotationObject, echoed: &TrackPayload) {
    object.server_id = echoed.id;
    if let Some(keyframes) = object.keyframes_mut() {
        for (frame, keyframe) in keyframes.iter_mut() {
            if let Some(wire) = echoed.shapes.iter().find(|s| s.frame == *frame) {
                keyframe.server_id = wire.id;
            }
        }
    }
    for element in &mut object.elements {
        if let Some(wire) = echoed.elements.iter().find(|e| e.label_id == element.label_id) {
            assign_track_ids(element, wire);
        }
    }
}
