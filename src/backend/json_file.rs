//! Backend storing each session as a JSON file on disk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AnnotationsBackend, SessionKind, SessionStore, UpdateAction};
use crate::error::ServerError;
use crate::sync::AnnotationsPayload;

/// File-backed backend: `<dir>/<kind>_<id>.json` per session.
#[derive(Debug)]
pub struct JsonFileBackend {
    dir: PathBuf,
    /// Serializes read-modify-write cycles
    guard: Mutex<()>,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding a session.
    pub fn session_path(&self, kind: SessionKind, id: u64) -> PathBuf {
        self.dir.join(format!("{}_{}.json", kind.as_str(), id))
    }

    fn read(&self, path: &Path) -> Result<SessionStore, ServerError> {
        if !path.exists() {
            return Ok(SessionStore::new());
        }
        let json = std::fs::read_to_string(path).map_err(io_error)?;
        serde_json::from_str(&json).map_err(|e| {
            ServerError::new(500, format!("Corrupt annotations file {}: {}", path.display(), e))
        })
    }

    fn write(&self, path: &Path, store: &SessionStore) -> Result<(), ServerError> {
        std::fs::create_dir_all(&self.dir).map_err(io_error)?;
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| ServerError::new(500, e.to_string()))?;
        std::fs::write(path, json).map_err(io_error)?;
        log::debug!("Wrote annotations to {}", path.display());
        Ok(())
    }
}

fn io_error(error: std::io::Error) -> ServerError {
    ServerError::new(500, format!("IO error: {}", error))
}

impl AnnotationsBackend for JsonFileBackend {
    fn fetch(&self, kind: SessionKind, id: u64) -> Result<AnnotationsPayload, ServerError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| ServerError::new(500, "File backend lock is poisoned"))?;
        Ok(self.read(&self.session_path(kind, id))?.annotations)
    }

    fn update(
        &self,
        kind: SessionKind,
        id: u64,
        payload: &AnnotationsPayload,
        action: UpdateAction,
    ) -> Result<AnnotationsPayload, ServerError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| ServerError::new(500, "File backend lock is poisoned"))?;
        let path = self.session_path(kind, id);
        let mut store = self.read(&path)?;
        let echoed = store.apply(payload, action)?;
        self.write(&path, &store)?;
        Ok(echoed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use crate::sync::TagPayload;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("annocore-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_persists_between_instances() {
        let dir = temp_dir("persist");
        let payload = AnnotationsPayload {
            tags: vec![TagPayload {
                id: None,
                frame: 2,
                label_id: 1,
                group: 0,
                source: Source::Manual,
                attributes: Vec::new(),
            }],
            ..Default::default()
        };

        let backend = JsonFileBackend::new(&dir);
        assert!(backend.fetch(SessionKind::Job, 4).expect("fetch").is_empty());
        let echoed = backend
            .update(SessionKind::Job, 4, &payload, UpdateAction::Create)
            .expect("create");
        assert_eq!(echoed.version, 1);
        assert!(backend.session_path(SessionKind::Job, 4).exists());

        let reopened = JsonFileBackend::new(&dir);
        let fetched = reopened.fetch(SessionKind::Job, 4).expect("fetch");
        assert_eq!(fetched.tags.len(), 1);
        assert_eq!(fetched.tags[0].id, echoed.tags[0].id);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_is_a_server_error() {
        let dir = temp_dir("corrupt");
        let backend = JsonFileBackend::new(&dir);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(backend.session_path(SessionKind::Task, 1), "{oops").expect("write");

        let result = backend.fetch(SessionKind::Task, 1);
        assert_eq!(result.map_err(|e| e.status), Err(500));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
