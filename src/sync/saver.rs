//! Save protocol between a collection and its backend.
//!
//! Pending changes are sent as three calls (create, update, delete). After
//! a wholesale clear a single `PUT` replaces the server state instead. Ids
//! echoed by the server are merged back after every accepted call, so a
//! failed save can be retried without creating anything twice.

use crate::backend::{AnnotationsBackend, SessionKind, UpdateAction};
use crate::collection::Collection;
use crate::error::AnnotationError;
use crate::model::{AnnotationObject, ClientId};
use crate::sync::convert::{PayloadOrder, assign_shape_ids, assign_track_ids, to_payload};
use crate::sync::payload::AnnotationsPayload;

/// Where the session stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Clean,
    Dirty,
    Saving,
}

/// What one save sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// The server state was replaced with a single `PUT`
    pub replaced: bool,
    /// Number of backend calls made
    pub calls: usize,
}

/// Sends the pending changes of a collection to a backend.
#[derive(Debug, Clone)]
pub struct AnnotationsSaver {
    kind: SessionKind,
    id: u64,
    version: u64,
    status: SaveStatus,
}

impl AnnotationsSaver {
    pub fn new(kind: SessionKind, id: u64) -> Self {
        Self {
            kind,
            id,
            version: 0,
            status: SaveStatus::Clean,
        }
    }

    /// Server version seen last.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    /// Update the status after a local change.
    pub(crate) fn refresh(&mut self, collection: &Collection) {
        self.status = if collection.has_unsaved_changes() {
            SaveStatus::Dirty
        } else {
            SaveStatus::Clean
        };
    }

    /// Save all pending changes.
    ///
    /// Without pending changes no backend call is made. On failure the
    /// error is returned unchanged and everything not yet accepted stays
    /// pending.
    pub fn save(
        &mut self,
        collection: &mut Collection,
        backend: &dyn AnnotationsBackend,
    ) -> Result<SaveReport, AnnotationError> {
        if !collection.has_unsaved_changes() {
            log::debug!("Nothing to save for {} {}", self.kind, self.id);
            self.status = SaveStatus::Clean;
            return Ok(SaveReport::default());
        }

        self.status = SaveStatus::Saving;
        let mut report = SaveReport::default();
        let result = if collection.is_flushed() {
            self.replace(collection, backend, &mut report)
        } else {
            self.send_changes(collection, backend, &mut report)
        };
        self.refresh(collection);

        match result {
            Ok(()) => {
                log::info!(
                    "💾 Saved {} {}: {} created, {} updated, {} deleted (version {})",
                    self.kind,
                    self.id,
                    report.created,
                    report.updated,
                    report.deleted,
                    self.version
                );
                Ok(report)
            }
            Err(e) => {
                log::warn!("Saving {} {} failed: {}", self.kind, self.id, e);
                Err(e)
            }
        }
    }

    fn replace(
        &mut self,
        collection: &mut Collection,
        backend: &dyn AnnotationsBackend,
        report: &mut SaveReport,
    ) -> Result<(), AnnotationError> {
        let (payload, order) = to_payload(collection.objects(), self.version);
        report.calls += 1;
        let echoed = backend.update(self.kind, self.id, &payload, UpdateAction::Put)?;
        reconcile(collection, &order, &echoed)?;
        collection.finish_flush();
        self.version = echoed.version;
        report.replaced = true;
        report.created = payload.len();
        Ok(())
    }

    fn send_changes(
        &mut self,
        collection: &mut Collection,
        backend: &dyn AnnotationsBackend,
        report: &mut SaveReport,
    ) -> Result<(), AnnotationError> {
        let created: Vec<ClientId> = collection.changes().created().iter().copied().collect();
        let count = self.send(collection, backend, &created, UpdateAction::Create, report)?;
        report.created = count;

        let updated: Vec<ClientId> = collection.changes().updated().iter().copied().collect();
        let count = self.send(collection, backend, &updated, UpdateAction::Update, report)?;
        report.updated = count;

        let deleted: Vec<ClientId> = collection.changes().deleted().iter().copied().collect();
        let count = self.send(collection, backend, &deleted, UpdateAction::Delete, report)?;
        report.deleted = count;
        Ok(())
    }

    /// Send one stage. Returns the number of objects sent.
    fn send(
        &mut self,
        collection: &mut Collection,
        backend: &dyn AnnotationsBackend,
        ids: &[ClientId],
        action: UpdateAction,
        report: &mut SaveReport,
    ) -> Result<usize, AnnotationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let objects: Vec<&AnnotationObject> =
            ids.iter().filter_map(|id| collection.object(*id)).collect();
        let (payload, order) = to_payload(objects, self.version);

        log::debug!("Sending {} {} objects", payload.len(), action);
        report.calls += 1;
        let echoed = backend.update(self.kind, self.id, &payload, action)?;
        self.version = echoed.version;

        if action == UpdateAction::Delete {
            for id in ids {
                if let Some(object) = collection.object_mut(*id) {
                    object.clear_server_ids();
                }
            }
        } else {
            reconcile(collection, &order, &echoed)?;
        }
        for id in ids {
            collection.mark_synced(*id);
        }
        Ok(payload.len())
    }
}

/// Copy server ids from an echoed payload onto the objects that were sent.
fn reconcile(
    collection: &mut Collection,
    order: &PayloadOrder,
    echoed: &AnnotationsPayload,
) -> Result<(), AnnotationError> {
    if echoed.tags.len() != order.tags.len()
        || echoed.shapes.len() != order.shapes.len()
        || echoed.tracks.len() != order.tracks.len()
    {
        return Err(AnnotationError::data(
            "Server response does not match the saved annotations",
        ));
    }

    for (id, tag) in order.tags.iter().zip(&echoed.tags) {
        if let Some(object) = collection.object_mut(*id) {
            object.server_id = tag.id;
        }
    }
    for (id, shape) in order.shapes.iter().zip(&echoed.shapes) {
        if let Some(object) = collection.object_mut(*id) {
            assign_shape_ids(object, shape);
        }
    }
    for (id, track) in order.tracks.iter().zip(&echoed.tracks) {
        if let Some(object) = collection.object_mut(*id) {
            assign_track_ids(object, track);
        }
    }
    log::debug!(
        "Reconciled ids of {} objects",
        order.tags.len() + order.shapes.len() + order.tracks.len()
    );
    Ok(())
}
