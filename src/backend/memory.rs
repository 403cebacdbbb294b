//! In-process backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{AnnotationsBackend, SessionKind, SessionStore, UpdateAction};
use crate::error::ServerError;
use crate::sync::AnnotationsPayload;

/// One call received by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub kind: SessionKind,
    pub id: u64,
    /// None for a fetch
    pub action: Option<UpdateAction>,
    /// Number of top-level objects in the request
    pub objects: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<(SessionKind, u64), SessionStore>,
    calls: Vec<BackendCall>,
    failures: Vec<(Option<UpdateAction>, ServerError)>,
}

/// Backend keeping every session in memory.
///
/// Records each call and can be told to fail specific calls, which makes it
/// the backend of choice for tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored annotations of a session.
    pub fn with_annotations(self, kind: SessionKind, id: u64, annotations: AnnotationsPayload) -> Self {
        if let Ok(mut state) = self.state.lock() {
            let store = state
                .sessions
                .entry((kind, id))
                .or_insert_with(SessionStore::new);
            store.annotations = annotations;
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, ServerError> {
        self.state
            .lock()
            .map_err(|_| ServerError::new(500, "Memory backend state is poisoned"))
    }

    /// Make the next call with `action` fail (`None` targets fetches).
    pub fn fail_on(&self, action: Option<UpdateAction>, error: ServerError) {
        if let Ok(mut state) = self.lock() {
            state.failures.push((action, error));
        }
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of update calls received so far.
    pub fn write_count(&self) -> usize {
        self.calls().iter().filter(|c| c.action.is_some()).count()
    }

    /// Currently stored annotations of a session.
    pub fn stored(&self, kind: SessionKind, id: u64) -> AnnotationsPayload {
        self.lock()
            .ok()
            .and_then(|s| s.sessions.get(&(kind, id)).map(|store| store.annotations.clone()))
            .unwrap_or_default()
    }
}

fn take_failure(state: &mut MemoryState, action: Option<UpdateAction>) -> Option<ServerError> {
    let index = state.failures.iter().position(|(a, _)| *a == action)?;
    Some(state.failures.remove(index).1)
}

impl AnnotationsBackend for MemoryBackend {
    fn fetch(&self, kind: SessionKind, id: u64) -> Result<AnnotationsPayload, ServerError> {
        let mut state = self.lock()?;
        let stored = state
            .sessions
            .get(&(kind, id))
            .map(|s| s.annotations.clone())
            .unwrap_or_default();
        state.calls.push(BackendCall {
            kind,
            id,
            action: None,
            objects: stored.len(),
        });
        if let Some(error) = take_failure(&mut state, None) {
            return Err(error);
        }
        Ok(stored)
    }

    fn update(
        &self,
        kind: SessionKind,
        id: u64,
        payload: &AnnotationsPayload,
        action: UpdateAction,
    ) -> Result<AnnotationsPayload, ServerError> {
        let mut state = self.lock()?;
        state.calls.push(BackendCall {
            kind,
            id,
            action: Some(action),
            objects: payload.len(),
        });
        if let Some(error) = take_failure(&mut state, Some(action)) {
            return Err(error);
        }
        state
            .sessions
            .entry((kind, id))
            .or_insert_with(SessionStore::new)
            .apply(payload, action)
    }
}
