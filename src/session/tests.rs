//! Session scenarios against in-process backends.

use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::backend::{JsonFileBackend, MemoryBackend, UpdateAction};
use crate::config::AutoSaveConfig;
use crate::error::ServerError;
use crate::model::{
    AttributeSpec, AttributeType, Label, LabelType, ObjectType, ShapeType,
};

const CAR: u64 = 1;
const BICYCLE: u64 = 2;

fn labels() -> LabelSet {
    LabelSet::new(vec![
        Label::new(CAR, "car", LabelType::Any).with_attribute(
            AttributeSpec::new(10, "color", AttributeType::Select, "red")
                .with_values(["red", "blue"]),
        ),
        Label::new(BICYCLE, "bicycle", LabelType::Any),
    ])
    .expect("labels")
}

/// Server state with a tag (id 8) on frame 0 and a rectangle (id 7) on frame 2.
fn seeded() -> AnnotationsPayload {
    serde_json::from_value(json!({
        "version": 3,
        "tags": [{"id": 8, "frame": 0, "label_id": BICYCLE}],
        "shapes": [{
            "id": 7,
            "frame": 2,
            "label_id": CAR,
            "type": "rectangle",
            "points": [0.0, 0.0, 10.0, 10.0],
            "attributes": [{"spec_id": 10, "value": "blue"}]
        }],
        "tracks": []
    }))
    .expect("payload")
}

fn open_range(backend: &Arc<MemoryBackend>, start: u64, stop: u64) -> Session {
    Session::open(
        SessionKind::Job,
        1,
        labels(),
        start,
        stop,
        EngineConfig::default(),
        backend.clone(),
    )
    .expect("open")
}

fn open(backend: &Arc<MemoryBackend>) -> Session {
    open_range(backend, 0, 100)
}

fn label(session: &Session, id: u64) -> Label {
    session.labels().get(id).cloned().expect("label")
}

fn rect(session: &Session, object_type: ObjectType, frame: u64, points: [f64; 4]) -> ObjectState {
    ObjectState::builder(object_type, label(session, CAR), frame)
        .shape_type(ShapeType::Rectangle)
        .points(points.to_vec())
        .build()
        .expect("rectangle")
}

fn actions(backend: &MemoryBackend) -> Vec<Option<UpdateAction>> {
    backend.calls().iter().map(|c| c.action).collect()
}

#[test]
fn test_open_loads_server_annotations() {
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let session = open(&backend);

    assert_eq!(session.version(), 3);
    assert!(!session.has_unsaved_changes());
    assert_eq!(session.save_status(), SaveStatus::Clean);
    assert!(session.history_info().undo.is_empty());

    let shapes = session.get(2, false, None).expect("get");
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].server_id(), Some(7));
    assert_eq!(shapes[0].attributes().get(&10).map(String::as_str), Some("blue"));
    assert_eq!(session.get(0, false, None).expect("get")[0].server_id(), Some(8));
    assert_eq!(actions(&backend), vec![None]);
}

#[test]
fn test_open_propagates_backend_errors() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_on(None, ServerError::new(500, "down"));
    let result = Session::open(
        SessionKind::Task,
        1,
        labels(),
        0,
        10,
        EngineConfig::default(),
        backend.clone(),
    );
    assert!(result.is_err_and(|e| e.is_server()));

    let unknown_label = serde_json::from_value(json!({
        "tags": [{"frame": 0, "label_id": 99}]
    }))
    .expect("payload");
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Task, 1, unknown_label));
    let result = Session::open(
        SessionKind::Task,
        1,
        labels(),
        0,
        10,
        EngineConfig::default(),
        backend.clone(),
    );
    assert!(result.is_err_and(|e| e.is_data()));
}

#[test]
fn test_put_then_get_increases_count() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    let before = session.get(1, false, None).expect("get").len();

    let polygon = ObjectState::builder(ObjectType::Shape, label(&session, CAR), 1)
        .shape_type(ShapeType::Polygon)
        .points(vec![0.0, 0.0, 100.0, 0.0, 100.0, 50.0])
        .z_order(0)
        .build()
        .expect("polygon");
    session.put(&[polygon]).expect("put");

    assert_eq!(session.get(1, false, None).expect("get").len(), before + 1);
    assert_eq!(session.save_status(), SaveStatus::Dirty);
}

#[test]
fn test_save_twice_writes_once() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    let id = session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put")[0];

    let report = session.save().expect("save");
    assert_eq!(report.created, 1);
    assert_eq!(report.calls, 1);
    assert_eq!(backend.write_count(), 1);
    assert!(!session.has_unsaved_changes());
    assert_eq!(session.save_status(), SaveStatus::Clean);

    let report = session.save().expect("second save");
    assert_eq!(report, SaveReport::default());
    assert_eq!(backend.write_count(), 1);

    let stored = backend.stored(SessionKind::Job, 1);
    assert_eq!(stored.shapes.len(), 1);
    let state = session.get(0, false, None).expect("get");
    assert_eq!(state[0].client_id(), Some(id));
    assert_eq!(state[0].server_id(), stored.shapes[0].id);
    assert_eq!(session.version(), stored.version);
}

#[test]
fn test_save_sends_create_update_delete() {
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let mut session = open(&backend);

    let mut shape = session.get(2, false, None).expect("get").remove(0);
    shape.set_points(vec![0.0, 0.0, 20.0, 20.0]).expect("points");
    session.save_state(&shape).expect("save state");
    session
        .put(&[rect(&session, ObjectType::Shape, 3, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    let tag = session.get(0, false, None).expect("get");
    session.delete(&tag, false).expect("delete");

    let report = session.save().expect("save");
    assert_eq!((report.created, report.updated, report.deleted), (1, 1, 1));
    assert_eq!(
        actions(&backend),
        vec![
            None,
            Some(UpdateAction::Create),
            Some(UpdateAction::Update),
            Some(UpdateAction::Delete)
        ]
    );

    let stored = backend.stored(SessionKind::Job, 1);
    assert!(stored.tags.is_empty());
    assert_eq!(stored.shapes.len(), 2);
    let updated = stored.shapes.iter().find(|s| s.id == Some(7)).expect("updated shape");
    assert_eq!(updated.points, vec![0.0, 0.0, 20.0, 20.0]);
}

#[test]
fn test_failed_save_can_be_retried() {
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let mut session = open(&backend);

    let mut shape = session.get(2, false, None).expect("get").remove(0);
    shape.set_occluded(true).expect("occluded");
    session.save_state(&shape).expect("save state");
    session
        .put(&[rect(&session, ObjectType::Shape, 3, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");

    backend.fail_on(Some(UpdateAction::Update), ServerError::new(503, "busy"));
    let failed = session.save();
    assert!(failed.is_err_and(|e| e.is_server()));
    assert!(session.has_unsaved_changes());
    assert_eq!(session.save_status(), SaveStatus::Dirty);
    assert!(session.get(2, false, None).expect("get")[0].occluded());

    session.save().expect("retry");
    assert!(!session.has_unsaved_changes());
    assert_eq!(
        actions(&backend),
        vec![
            None,
            Some(UpdateAction::Create),
            Some(UpdateAction::Update),
            Some(UpdateAction::Update)
        ]
    );
    assert_eq!(backend.stored(SessionKind::Job, 1).shapes.len(), 2);
}

#[test]
fn test_undo_delete_after_save_recreates_object() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    session.save().expect("save");

    let states = session.get(0, false, None).expect("get");
    session.delete(&states, false).expect("delete");
    session.save().expect("save delete");
    assert!(backend.stored(SessionKind::Job, 1).is_empty());

    assert_eq!(session.undo(1), 1);
    assert!(session.has_unsaved_changes());
    let report = session.save().expect("save again");
    assert_eq!(report.created, 1);
    assert_eq!(backend.stored(SessionKind::Job, 1).shapes.len(), 1);
}

#[test]
fn test_clear_then_save_replaces_server_state() {
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let mut session = open(&backend);

    session.clear(&ClearOptions::new()).expect("clear");
    assert!(session.has_unsaved_changes());
    session
        .put(&[rect(&session, ObjectType::Shape, 5, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");

    let report = session.save().expect("save");
    assert!(report.replaced);
    assert_eq!(report.calls, 1);
    assert_eq!(actions(&backend).last(), Some(&Some(UpdateAction::Put)));

    let stored = backend.stored(SessionKind::Job, 1);
    assert!(stored.tags.is_empty());
    assert_eq!(stored.shapes.len(), 1);
    assert_eq!(stored.shapes[0].frame, 5);
    assert!(session.get(5, false, None).expect("get")[0].server_id().is_some());
}

#[test]
fn test_clear_with_reload_discards_local_changes() {
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let mut session = open(&backend);
    session
        .put(&[rect(&session, ObjectType::Shape, 5, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");

    session
        .clear(&ClearOptions::new().with_reload(true))
        .expect("reload");
    assert!(!session.has_unsaved_changes());
    assert!(session.get(5, false, None).expect("get").is_empty());
    assert_eq!(session.get(2, false, None).expect("get").len(), 1);
    assert_eq!(actions(&backend), vec![None, None]);
}

#[test]
fn test_frame_range_is_enforced() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open_range(&backend, 5, 10);

    assert!(session.get(4, false, None).is_err_and(|e| e.is_argument()));
    assert!(session.get(11, false, None).is_err_and(|e| e.is_argument()));
    assert!(session.search(None, 5, 11).is_err_and(|e| e.is_argument()));
    assert!(session.search_empty(4, 10).is_err_and(|e| e.is_argument()));
    assert!(session.delete_frame(11).is_err_and(|e| e.is_argument()));
    let outside = rect(&session, ObjectType::Shape, 11, [0.0, 0.0, 10.0, 10.0]);
    assert!(session.put(&[outside]).is_err_and(|e| e.is_argument()));

    let track: AnnotationsPayload = serde_json::from_value(json!({
        "tracks": [{
            "frame": 3,
            "label_id": CAR,
            "shapes": [{"frame": 3, "type": "rectangle", "points": [0.0, 0.0, 10.0, 10.0]}]
        }]
    }))
    .expect("payload");
    assert!(session.import_payload(&track).is_err_and(|e| e.is_argument()));
    assert!(session.collection().is_empty());
}

#[test]
fn test_split_gives_new_client_id() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    session
        .put(&[rect(&session, ObjectType::Track, 4, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");

    let at5 = session.get(5, false, None).expect("get");
    assert_eq!(
        session.get(4, false, None).expect("get")[0].client_id(),
        at5[0].client_id()
    );

    session.split(&at5[0], 5).expect("split");
    let at4 = session.get(4, false, None).expect("get");
    let at5 = session.get(5, false, None).expect("get");
    assert_ne!(at4[0].client_id(), at5[0].client_id());
}

#[test]
fn test_statistics_after_frame_deletion() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    let id = session
        .put(&[rect(&session, ObjectType::Track, 10, [0.0, 0.0, 10.0, 10.0])])
        .expect("put")[0];
    let mut state = session
        .get(20, false, None)
        .expect("get")
        .into_iter()
        .find(|s| s.client_id() == Some(id))
        .expect("track");
    state.set_outside(true).expect("outside");
    session.save_state(&state).expect("save state");

    let before = session.statistics().total.interpolated;
    assert_eq!(before, 9);

    session.delete_frame(10).expect("delete frame");
    assert_eq!(session.statistics().total.interpolated, before - 9);
    assert!(session.deleted_frames().contains(&10));
    assert_eq!(session.search(None, 0, 15).expect("search"), Some(11));

    session.restore_frame(10).expect("restore frame");
    assert_eq!(session.statistics().total.interpolated, before);
}

#[test]
fn test_search_with_filter() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open_range(&backend, 0, 994);
    let tag = ObjectState::builder(ObjectType::Tag, label(&session, BICYCLE), 500)
        .build()
        .expect("tag");
    let shape = rect(&session, ObjectType::Shape, 510, [0.0, 0.0, 10.0, 10.0]);
    session.put(&[tag, shape]).expect("put");

    let filter = FilterExpr::parse_str(
        r#"{"and": [{"==": [{"var": "type"}, "shape"]}, {"==": [{"var": "shape"}, "rectangle"]}]}"#,
    )
    .expect("filter");
    assert_eq!(session.search(Some(&filter), 495, 994).expect("search"), Some(510));
    assert_eq!(session.search(Some(&filter), 511, 994).expect("search"), None);
}

#[test]
fn test_history_through_session() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    session.save().expect("save");
    assert!(!session.has_unsaved_changes());

    assert_eq!(session.undo(3), 1);
    assert!(session.has_unsaved_changes());
    assert_eq!(session.history_info().redo, vec!["Create object".to_string()]);
    assert_eq!(session.redo(1), 1);
    assert!(session.get(0, false, None).expect("get")[0].server_id().is_some());
}

#[test]
fn test_export_and_import_payload() {
    let source = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, seeded()));
    let exported = open(&source).export_payload();
    assert_eq!(exported.version, 3);
    assert_eq!(exported.len(), 2);

    let backend = Arc::new(MemoryBackend::new());
    let mut session = Session::open(
        SessionKind::Task,
        2,
        labels(),
        0,
        100,
        EngineConfig::default(),
        backend.clone(),
    )
    .expect("open");
    let ids = session.import_payload(&exported).expect("import");
    assert_eq!(ids.len(), 2);
    assert!(session.has_unsaved_changes());
    assert!(session.get(2, false, None).expect("get")[0].server_id().is_none());

    let report = session.save().expect("save");
    assert_eq!(report.created, 2);
    assert_eq!(backend.stored(SessionKind::Task, 2).len(), 2);

    assert_eq!(session.undo(1), 1);
    assert!(session.collection().is_empty());
}

#[test]
fn test_autosave_when_due() {
    let mut config = EngineConfig::default();
    config.autosave = AutoSaveConfig {
        enabled: true,
        debounce_secs: 0,
        interval_secs: 0,
    };
    let backend = Arc::new(MemoryBackend::new());
    let mut session = Session::open(
        SessionKind::Job,
        1,
        labels(),
        0,
        10,
        config,
        backend.clone(),
    )
    .expect("open");

    assert!(session.autosave_if_due().expect("autosave").is_none());
    session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    assert!(session.autosave().is_dirty());

    let report = session.autosave_if_due().expect("autosave").expect("saved");
    assert_eq!(report.created, 1);
    assert!(session.autosave_if_due().expect("autosave").is_none());
    assert_eq!(backend.write_count(), 1);
}

#[test]
fn test_file_backend_persists_sessions() {
    let dir = std::env::temp_dir().join(format!("annocore-session-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let backend: Arc<dyn AnnotationsBackend> = Arc::new(JsonFileBackend::new(&dir));

    let mut session = Session::open(
        SessionKind::Task,
        9,
        labels(),
        0,
        10,
        EngineConfig::default(),
        backend.clone(),
    )
    .expect("open");
    session
        .put(&[rect(&session, ObjectType::Track, 2, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    session.save().expect("save");

    let reopened = Session::open(
        SessionKind::Task,
        9,
        labels(),
        0,
        10,
        EngineConfig::default(),
        backend,
    )
    .expect("reopen");
    let states = reopened.get(4, false, None).expect("get");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].object_type(), ObjectType::Track);
    assert!(states[0].server_id().is_some());
    assert!(!reopened.has_unsaved_changes());

    let _ = std::fs::remove_dir_all(&dir);
}

fn import_json(value: serde_json::Value) -> AnnotationsPayload {
    serde_json::from_value(value).expect("payload")
}

#[test]
fn test_import_rejects_invalid_objects() {
    let backend = Arc::new(MemoryBackend::new());
    let mut session = open(&backend);
    let valid = json!({
        "frame": 1, "label_id": CAR, "type": "rectangle", "points": [0.0, 0.0, 10.0, 10.0]
    });

    let empty = import_json(json!({"shapes": [
        valid.clone(),
        {"frame": 1, "label_id": CAR, "type": "rectangle", "points": []}
    ]}));
    assert!(session.import_payload(&empty).is_err_and(|e| e.is_data()));

    let odd = import_json(json!({"shapes": [
        valid.clone(),
        {"frame": 1, "label_id": CAR, "type": "polygon", "points": [0.0, 0.0, 1.0]}
    ]}));
    assert!(session.import_payload(&odd).is_err_and(|e| e.is_argument()));

    let tiny = import_json(json!({"shapes": [
        {"frame": 1, "label_id": CAR, "type": "rectangle", "points": [0.0, 0.0, 1.0, 1.0]}
    ]}));
    assert!(session.import_payload(&tiny).is_err_and(|e| e.is_data()));

    let bad_value = import_json(json!({"shapes": [{
        "frame": 1, "label_id": CAR, "type": "rectangle", "points": [0.0, 0.0, 10.0, 10.0],
        "attributes": [{"spec_id": 10, "value": "green"}]
    }]}));
    assert!(session.import_payload(&bad_value).is_err_and(|e| e.is_argument()));

    let foreign_attribute = import_json(json!({"tags": [{
        "frame": 1, "label_id": BICYCLE, "attributes": [{"spec_id": 10, "value": "red"}]
    }]}));
    assert!(session.import_payload(&foreign_attribute).is_err_and(|e| e.is_argument()));

    let bad_keyframe = import_json(json!({"tracks": [{
        "frame": 1, "label_id": CAR,
        "shapes": [
            {"frame": 1, "type": "rectangle", "points": [0.0, 0.0, 10.0, 10.0]},
            {"frame": 4, "type": "rectangle", "points": []}
        ]
    }]}));
    assert!(session.import_payload(&bad_keyframe).is_err_and(|e| e.is_data()));

    assert!(session.collection().is_empty());
    assert!(!session.has_unsaved_changes());
    assert!(session.history_info().undo.is_empty());

    let good = import_json(json!({"shapes": [valid]}));
    assert_eq!(session.import_payload(&good).expect("import").len(), 1);
}

#[test]
fn test_group_ids_never_overflow() {
    let payload = import_json(json!({
        "version": 1,
        "tags": [{"id": 8, "frame": 0, "label_id": BICYCLE, "group": u64::MAX}]
    }));
    let backend = Arc::new(MemoryBackend::new().with_annotations(SessionKind::Job, 1, payload));
    let mut session = open(&backend);

    let tags = session.get(0, false, None).expect("get");
    assert_eq!(tags[0].group(), u64::MAX);
    assert!(session.group(&tags, false).is_err_and(|e| e.is_argument()));
    assert_eq!(session.group(&tags, true).expect("reset"), 0);
}

#[test]
fn test_undo_to_saved_state_cancels_autosave() {
    let mut config = EngineConfig::default();
    config.autosave = AutoSaveConfig {
        enabled: true,
        debounce_secs: 0,
        interval_secs: 0,
    };
    let backend = Arc::new(MemoryBackend::new());
    let mut session = Session::open(
        SessionKind::Job,
        1,
        labels(),
        0,
        10,
        config,
        backend.clone(),
    )
    .expect("open");

    session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");
    assert!(session.autosave().is_dirty());

    session.undo(1);
    assert!(!session.has_unsaved_changes());
    assert!(!session.autosave().is_dirty());
    assert!(session.autosave_if_due().expect("autosave").is_none());
    assert_eq!(backend.write_count(), 0);
}

#[test]
fn test_failed_autosave_is_counted() {
    let mut config = EngineConfig::default();
    config.autosave = AutoSaveConfig {
        enabled: true,
        debounce_secs: 0,
        interval_secs: 0,
    };
    let backend = Arc::new(MemoryBackend::new());
    let mut session = Session::open(
        SessionKind::Job,
        1,
        labels(),
        0,
        10,
        config,
        backend.clone(),
    )
    .expect("open");
    session
        .put(&[rect(&session, ObjectType::Shape, 0, [0.0, 0.0, 10.0, 10.0])])
        .expect("put");

    backend.fail_on(Some(UpdateAction::Create), ServerError::new(503, "busy"));
    assert!(session.autosave_if_due().is_err_and(|e| e.is_server()));
    assert_eq!(session.autosave().failures(), 1);
    assert!(session.autosave().is_dirty());
}
