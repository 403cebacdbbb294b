//! Backends that store annotations on behalf of a session.
//!
//! A backend is the remote source of truth. The engine only needs two
//! calls: fetch everything, and apply a batch with an action discriminator.

mod json_file;
mod memory;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use json_file::JsonFileBackend;
pub use memory::{BackendCall, MemoryBackend};
pub use store::SessionStore;

use crate::error::ServerError;
use crate::sync::AnnotationsPayload;

/// Which kind of session the annotations belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// The whole frame range of a task
    Task,
    /// A segment of a task
    Job,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Task => "task",
            SessionKind::Job => "job",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an update call does with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateAction {
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    /// Replace everything
    #[serde(rename = "PUT")]
    Put,
}

impl UpdateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateAction::Create => "create",
            UpdateAction::Update => "update",
            UpdateAction::Delete => "delete",
            UpdateAction::Put => "PUT",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote storage of annotations.
///
/// `update` echoes the payload back with server ids filled in for every
/// created object and keyframe, in the order they were sent, and with the
/// new version.
pub trait AnnotationsBackend: Send + Sync {
    /// Fetch all annotations of a session.
    fn fetch(&self, kind: SessionKind, id: u64) -> Result<AnnotationsPayload, ServerError>;

    /// Apply a batch of changes.
    fn update(
        &self,
        kind: SessionKind,
        id: u64,
        payload: &AnnotationsPayload,
        action: UpdateAction,
    ) -> Result<AnnotationsPayload, ServerError>;
}
