//! Pending changes between the collection and the server.

use std::collections::BTreeSet;

use crate::model::{AnnotationObject, ClientId};

/// Client ids of top-level objects that differ from the server.
///
/// An object's bucket follows from whether the server knows it and whether
/// it is tombstoned: unknown and live is `created`, known and live is
/// `updated`, known and removed is `deleted`. Unknown removed objects never
/// reached the server and are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    created: BTreeSet<ClientId>,
    updated: BTreeSet<ClientId>,
    deleted: BTreeSet<ClientId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `object` changed locally.
    pub fn mark(&mut self, object: &AnnotationObject) {
        let id = object.client_id;
        self.forget(id);
        match (object.server_id.is_some(), object.removed) {
            (false, false) => {
                self.created.insert(id);
            }
            (false, true) => {}
            (true, false) => {
                self.updated.insert(id);
            }
            (true, true) => {
                self.deleted.insert(id);
            }
        }
    }

    /// Drop `id` from every bucket, e.g. after it was synchronized.
    pub fn forget(&mut self, id: ClientId) {
        self.created.remove(&id);
        self.updated.remove(&id);
        self.deleted.remove(&id);
    }

    pub fn created(&self) -> &BTreeSet<ClientId> {
        &self.created
    }

    pub fn updated(&self) -> &BTreeSet<ClientId> {
        &self.updated
    }

    pub fn deleted(&self) -> &BTreeSet<ClientId> {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}
