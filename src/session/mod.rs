//! Annotation session of a task or a job.
//!
//! A [`Session`] binds a frame range to a [`Collection`] and a backend. It
//! loads the server state on open, forwards edits to the collection, keeps
//! the list of deleted frames and decides when to save.

mod autosave;
#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;

pub use autosave::AutoSaveManager;

use crate::backend::{AnnotationsBackend, SessionKind};
use crate::collection::{ClearOptions, Collection, SelectResult, Statistics};
use crate::config::EngineConfig;
use crate::error::AnnotationError;
use crate::filter::FilterExpr;
use crate::history::HistoryInfo;
use crate::model::{AnnotationObject, ClientId, LabelSet, ObjectState};
use crate::sync::{
    AnnotationsPayload, AnnotationsSaver, SaveReport, SaveStatus, from_payload, to_payload,
};

/// Annotations of one task or job, synchronized with a backend.
pub struct Session {
    kind: SessionKind,
    id: u64,
    collection: Collection,
    saver: AnnotationsSaver,
    backend: Arc<dyn AnnotationsBackend>,
    /// Frames excluded from statistics and search
    deleted_frames: BTreeSet<u64>,
    autosave: AutoSaveManager,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("start", &self.collection.start())
            .field("stop", &self.collection.stop())
            .field("objects", &self.collection.len())
            .field("status", &self.saver.status())
            .finish()
    }
}

impl Session {
    /// Open a session over frames `start..=stop` and load its annotations.
    pub fn open(
        kind: SessionKind,
        id: u64,
        labels: LabelSet,
        start: u64,
        stop: u64,
        config: EngineConfig,
        backend: Arc<dyn AnnotationsBackend>,
    ) -> Result<Self, AnnotationError> {
        let autosave = AutoSaveManager::from_config(&config.autosave);
        let collection = Collection::new(labels, start, stop, config)?;
        let mut session = Self {
            kind,
            id,
            collection,
            saver: AnnotationsSaver::new(kind, id),
            backend,
            deleted_frames: BTreeSet::new(),
            autosave,
        };
        session.reload()?;
        Ok(session)
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(&self) -> u64 {
        self.collection.start()
    }

    pub fn stop(&self) -> u64 {
        self.collection.stop()
    }

    pub fn labels(&self) -> &LabelSet {
        self.collection.labels()
    }

    /// Read access to the underlying collection.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Discard local state and load the annotations stored on the backend.
    fn reload(&mut self) -> Result<(), AnnotationError> {
        let payload = self.backend.fetch(self.kind, self.id)?;
        let labels = self.collection.labels().clone();
        let collection = &mut self.collection;
        let objects = from_payload(&payload, &labels, true, &mut || collection.allocate_id())?;
        for object in &objects {
            self.check_object_frames(object)?;
        }

        let count = objects.len();
        self.collection.replace_all(objects);
        self.saver.set_version(payload.version);
        self.saver.refresh(&self.collection);
        self.autosave.reset();
        log::info!(
            "📂 Loaded {} objects for {} {} (version {})",
            count,
            self.kind,
            self.id,
            payload.version
        );
        Ok(())
    }

    fn check_object_frames(&self, object: &AnnotationObject) -> Result<(), AnnotationError> {
        match object.keyframes() {
            Some(keyframes) => keyframes
                .keys()
                .try_for_each(|frame| self.collection.check_frame(*frame)),
            None => self.collection.check_frame(object.first_frame()),
        }?;
        object
            .elements
            .iter()
            .try_for_each(|element| self.check_object_frames(element))
    }

    /// Bookkeeping after every local change.
    fn touched(&mut self) {
        self.saver.refresh(&self.collection);
        self.autosave.note_change(self.collection.has_unsaved_changes());
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    /// States of the objects on `frame`.
    pub fn get(
        &self,
        frame: u64,
        all_interpolated: bool,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<ObjectState>, AnnotationError> {
        self.collection.get(frame, all_interpolated, filter)
    }

    pub fn put(&mut self, states: &[ObjectState]) -> Result<Vec<ClientId>, AnnotationError> {
        let ids = self.collection.put(states)?;
        self.touched();
        Ok(ids)
    }

    /// Commit the edits of a state and return its fresh snapshot.
    pub fn save_state(&mut self, state: &ObjectState) -> Result<ObjectState, AnnotationError> {
        let saved = self.collection.save_state(state)?;
        self.touched();
        Ok(saved)
    }

    pub fn delete(&mut self, states: &[ObjectState], force: bool) -> Result<usize, AnnotationError> {
        let count = self.collection.delete(states, force)?;
        self.touched();
        Ok(count)
    }

    pub fn merge(&mut self, states: &[ObjectState]) -> Result<ClientId, AnnotationError> {
        let id = self.collection.merge(states)?;
        self.touched();
        Ok(id)
    }

    pub fn split(
        &mut self,
        state: &ObjectState,
        frame: u64,
    ) -> Result<(ClientId, ClientId), AnnotationError> {
        let ids = self.collection.split(state, frame)?;
        self.touched();
        Ok(ids)
    }

    pub fn group(&mut self, states: &[ObjectState], reset: bool) -> Result<u64, AnnotationError> {
        let group = self.collection.group(states, reset)?;
        self.touched();
        Ok(group)
    }

    /// Clear annotations, or with `reload` replace them with the server state.
    pub fn clear(&mut self, options: &ClearOptions) -> Result<(), AnnotationError> {
        if options.reload {
            return self.reload();
        }
        self.collection.clear(options)?;
        self.touched();
        Ok(())
    }

    /// Annotation counts, leaving out deleted frames.
    pub fn statistics(&self) -> Statistics {
        self.collection.statistics(&self.deleted_frames)
    }

    pub fn select(
        &self,
        states: &[ObjectState],
        x: f64,
        y: f64,
    ) -> Result<Option<SelectResult>, AnnotationError> {
        self.collection.select(states, x, y)
    }

    /// First frame between `from` and `to` with an object matching `filter`.
    pub fn search(
        &self,
        filter: Option<&FilterExpr>,
        from: u64,
        to: u64,
    ) -> Result<Option<u64>, AnnotationError> {
        self.collection.search(filter, from, to, &self.deleted_frames)
    }

    /// First frame between `from` and `to` without visible objects.
    pub fn search_empty(&self, from: u64, to: u64) -> Result<Option<u64>, AnnotationError> {
        self.collection.search_empty(from, to, &self.deleted_frames)
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Send pending changes to the backend.
    pub fn save(&mut self) -> Result<SaveReport, AnnotationError> {
        match self.saver.save(&mut self.collection, self.backend.as_ref()) {
            Ok(report) => {
                self.autosave.record_save(&report);
                Ok(report)
            }
            Err(e) => {
                self.autosave.record_failure();
                Err(e)
            }
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.collection.has_unsaved_changes()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.saver.status()
    }

    /// Server version seen last.
    pub fn version(&self) -> u64 {
        self.saver.version()
    }

    /// Save if auto-save is enabled and a save is due.
    pub fn autosave_if_due(&mut self) -> Result<Option<SaveReport>, AnnotationError> {
        if !self.autosave.should_save() {
            return Ok(None);
        }
        log::debug!("Auto-saving {} {}", self.kind, self.id);
        self.save().map(Some)
    }

    pub fn autosave(&self) -> &AutoSaveManager {
        &self.autosave
    }

    pub fn autosave_mut(&mut self) -> &mut AutoSaveManager {
        &mut self.autosave
    }

    // ========================================================================
    // History
    // ========================================================================

    pub fn undo(&mut self, count: usize) -> usize {
        let undone = self.collection.undo(count);
        if undone > 0 {
            self.touched();
        }
        undone
    }

    pub fn redo(&mut self, count: usize) -> usize {
        let redone = self.collection.redo(count);
        if redone > 0 {
            self.touched();
        }
        redone
    }

    pub fn history_info(&self) -> HistoryInfo {
        self.collection.history_info()
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Exclude a frame from statistics and search.
    pub fn delete_frame(&mut self, frame: u64) -> Result<(), AnnotationError> {
        self.collection.check_frame(frame)?;
        if self.deleted_frames.insert(frame) {
            log::debug!("🗑 Deleted frame {}", frame);
        }
        Ok(())
    }

    pub fn restore_frame(&mut self, frame: u64) -> Result<(), AnnotationError> {
        self.collection.check_frame(frame)?;
        if self.deleted_frames.remove(&frame) {
            log::debug!("Restored frame {}", frame);
        }
        Ok(())
    }

    pub fn deleted_frames(&self) -> &BTreeSet<u64> {
        &self.deleted_frames
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Current annotations in wire format.
    pub fn export_payload(&self) -> AnnotationsPayload {
        to_payload(self.collection.objects(), self.saver.version()).0
    }

    /// Add the objects of a payload as new local annotations.
    ///
    /// Server ids in the payload are ignored; the objects are created on the
    /// next save. Nothing is added if any object is invalid.
    pub fn import_payload(
        &mut self,
        payload: &AnnotationsPayload,
    ) -> Result<Vec<ClientId>, AnnotationError> {
        let labels = self.collection.labels().clone();
        let collection = &mut self.collection;
        let objects = from_payload(payload, &labels, false, &mut || collection.allocate_id())?;
        for object in &objects {
            self.check_object_frames(object)?;
        }
        let ids = self.collection.import(objects)?;
        log::info!("Imported {} objects into {} {}", ids.len(), self.kind, self.id);
        self.touched();
        Ok(ids)
    }
}
