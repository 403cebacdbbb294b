//! Server-side model of one session's annotations, shared by the
//! in-process backends.

use serde::{Deserialize, Serialize};

use super::UpdateAction;
use crate::error::ServerError;
use crate::sync::{AnnotationsPayload, ShapePayload, TrackPayload};

/// Stored annotations plus the id counter of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStore {
    pub next_id: u64,
    pub annotations: AnnotationsPayload,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            annotations: AnnotationsPayload::default(),
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn assign_shape(&mut self, shape: &mut ShapePayload) {
        if shape.id.is_none() {
            shape.id = Some(self.take_id());
        }
        for element in &mut shape.elements {
            self.assign_shape(element);
        }
    }

    fn assign_track(&mut self, track: &mut TrackPayload) {
        if track.id.is_none() {
            track.id = Some(self.take_id());
        }
        for shape in &mut track.shapes {
            if shape.id.is_none() {
                shape.id = Some(self.take_id());
            }
        }
        for element in &mut track.elements {
            self.assign_track(element);
        }
    }

    /// Give ids to everything in `payload` that has none.
    fn assign_ids(&mut self, payload: &mut AnnotationsPayload) {
        for tag in &mut payload.tags {
            if tag.id.is_none() {
                tag.id = Some(self.take_id());
            }
        }
        for shape in &mut payload.shapes {
            self.assign_shape(shape);
        }
        for track in &mut payload.tracks {
            self.assign_track(track);
        }
    }

    /// Apply an update and return the echoed payload.
    pub fn apply(
        &mut self,
        payload: &AnnotationsPayload,
        action: UpdateAction,
    ) -> Result<AnnotationsPayload, ServerError> {
        let mut echoed = payload.clone();
        match action {
            UpdateAction::Create => {
                if let Some(id) = existing_ids(payload).into_iter().next() {
                    return Err(ServerError::new(400, format!("Object {} already exists", id)));
                }
                self.assign_ids(&mut echoed);
                let stored = &mut self.annotations;
                stored.tags.extend(echoed.tags.iter().cloned());
                stored.shapes.extend(echoed.shapes.iter().cloned());
                stored.tracks.extend(echoed.tracks.iter().cloned());
            }
            UpdateAction::Update => {
                self.assign_ids(&mut echoed);
                let mut stored = self.annotations.clone();
                for tag in &echoed.tags {
                    let slot = stored.tags.iter_mut().find(|t| t.id == tag.id);
                    *slot.ok_or_else(|| not_found(tag.id))? = tag.clone();
                }
                for shape in &echoed.shapes {
                    let slot = stored.shapes.iter_mut().find(|s| s.id == shape.id);
                    *slot.ok_or_else(|| not_found(shape.id))? = shape.clone();
                }
                for track in &echoed.tracks {
                    let slot = stored.tracks.iter_mut().find(|t| t.id == track.id);
                    *slot.ok_or_else(|| not_found(track.id))? = track.clone();
                }
                self.annotations = stored;
            }
            UpdateAction::Delete => {
                let ids = existing_ids(payload);
                let stored = &mut self.annotations;
                stored.tags.retain(|t| !t.id.is_some_and(|id| ids.contains(&id)));
                stored.shapes.retain(|s| !s.id.is_some_and(|id| ids.contains(&id)));
                stored.tracks.retain(|t| !t.id.is_some_and(|id| ids.contains(&id)));
            }
            UpdateAction::Put => {
                self.assign_ids(&mut echoed);
                self.annotations.tags = echoed.tags.clone();
                self.annotations.shapes = echoed.shapes.clone();
                self.annotations.tracks = echoed.tracks.clone();
            }
        }
        self.annotations.version += 1;
        echoed.version = self.annotations.version;
        Ok(echoed)
    }
}

fn not_found(id: Option<u64>) -> ServerError {
    match id {
        Some(id) => ServerError::new(404, format!("Object {} not found", id)),
        None => ServerError::new(400, "Object id is required for updates"),
    }
}

fn existing_ids(payload: &AnnotationsPayload) -> Vec<u64> {
    payload
        .tags
        .iter()
        .map(|t| t.id)
        .chain(payload.shapes.iter().map(|s| s.id))
        .chain(payload.tracks.iter().map(|t| t.id))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use crate::sync::TagPayload;

    fn tag(id: Option<u64>, frame: u64) -> TagPayload {
        TagPayload {
            id,
            frame,
            label_id: 1,
            group: 0,
            source: Source::Manual,
            attributes: Vec::new(),
        }
    }

    fn payload(tags: Vec<TagPayload>) -> AnnotationsPayload {
        AnnotationsPayload {
            tags,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_assigns_ids_and_bumps_version() {
        let mut store = SessionStore::new();
        let echoed = store
            .apply(&payload(vec![tag(None, 0), tag(None, 1)]), UpdateAction::Create)
            .expect("create");
        assert_eq!(echoed.tags[0].id, Some(1));
        assert_eq!(echoed.tags[1].id, Some(2));
        assert_eq!(echoed.version, 1);
        assert_eq!(store.annotations.tags.len(), 2);
    }

    #[test]
    fn test_update_unknown_id_fails() {
        let mut store = SessionStore::new();
        let result = store.apply(&payload(vec![tag(Some(9), 0)]), UpdateAction::Update);
        assert_eq!(result.map_err(|e| e.status), Err(404));
    }

    #[test]
    fn test_delete_and_put() {
        let mut store = SessionStore::new();
        store
            .apply(&payload(vec![tag(None, 0), tag(None, 1)]), UpdateAction::Create)
            .expect("create");
        store
            .apply(&payload(vec![tag(Some(1), 0)]), UpdateAction::Delete)
            .expect("delete");
        assert_eq!(store.annotations.tags.len(), 1);

        let echoed = store
            .apply(&payload(vec![tag(None, 5)]), UpdateAction::Put)
            .expect("put");
        assert_eq!(store.annotations.tags.len(), 1);
        assert_eq!(echoed.tags[0].id, Some(3));
        assert_eq!(store.annotations.version, 3);
    }
}
