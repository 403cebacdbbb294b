//! Tests for the annotation collection.
//!
//! Fixtures live here; each submodule covers one group of operations.


use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::model::{
    AttributeSpec, AttributeType, ClientId, Label, LabelSet, LabelType, ObjectState, ObjectType,
    ShapeType,
};

pub(super) const CAR: u64 = 1;
pub(super) const BICYCLE: u64 = 2;
pub(super) const PERSON: u64 = 3;
pub(super) const COLOR: u64 = 10;
pub(super) const SPEED: u64 = 11;

/// `car` (any shape, immutable color + mutable speed), `bicycle` (any shape)
/// and the `person` skeleton with `head` and `foot` points.
pub(super) fn labels() -> LabelSet {
    LabelSet::new(vec![
        Label::new(CAR, "car", LabelType::Any)
            .with_attribute(
                AttributeSpec::new(COLOR, "color", AttributeType::Select, "red")
                    .with_values(["red", "blue"]),
            )
            .with_attribute(
                AttributeSpec::new(SPEED, "speed", AttributeType::Number, "0")
                    .with_values(["0", "100", "1"])
                    .mutable(true),
            ),
        Label::new(BICYCLE, "bicycle", LabelType::Any),
        Label::new(PERSON, "person", LabelType::Skeleton)
            .with_sublabel(Label::new(4, "head", LabelType::Points))
            .with_sublabel(Label::new(5, "foot", LabelType::Points)),
    ])
    .expect("labels")
}

/// Collection over frames 0..=100.
pub(super) fn collection() -> Collection {
    Collection::new(labels(), 0, 100, EngineConfig::default()).expect("collection")
}

/// Label `id` from a fresh label set, equal to the collection's copy.
pub(super) fn label(id: u64) -> Label {
    labels().get(id).cloned().expect("label")
}

pub(super) fn rect(
    object_type: ObjectType,
    label_id: u64,
    frame: u64,
    points: [f64; 4],
) -> ObjectState {
    ObjectState::builder(object_type, label(label_id), frame)
        .shape_type(ShapeType::Rectangle)
        .points(points.to_vec())
        .build()
        .expect("rectangle")
}

pub(super) fn skeleton(object_type: ObjectType, frame: u64) -> ObjectState {
    let person = label(PERSON);
    let elements = person
        .sublabels
        .iter()
        .enumerate()
        .map(|(i, sublabel)| {
            let offset = 10.0 * i as f64;
            ObjectState::builder(object_type, sublabel.clone(), frame)
                .shape_type(ShapeType::Points)
                .points(vec![offset, offset])
                .build()
                .expect("element")
        })
        .collect();
    ObjectState::builder(object_type, person, frame)
        .shape_type(ShapeType::Skeleton)
        .elements(elements)
        .build()
        .expect("skeleton")
}

/// Put one state and return its client id.
pub(super) fn put(collection: &mut Collection, state: ObjectState) -> ClientId {
    collection.put(&[state]).expect("put")[0]
}

/// State of one object on `frame`, including outside tracks.
pub(super) fn state_of(collection: &Collection, frame: u64, id: ClientId) -> ObjectState {
    collection
        .get(frame, true, None)
        .expect("get")
        .into_iter()
        .find(|s| s.client_id() == Some(id))
        .expect("state on frame")
}
