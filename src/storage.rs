//! Session persistence.
//!
//! Sessions are stored one JSON file per session under the platform's local
//! data directory. [`MemoryStorage`] keeps them in a map instead.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::chat::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid session data: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait SessionStorage: Send + Sync {
    /// All saved sessions, most recently updated first.
    fn load_all(&self) -> Result<Vec<Session>, StorageError>;
    fn save(&self, session: &Session) -> Result<(), StorageError>;
    /// Deleting a session that was never saved is not an error.
    fn delete(&self, session_id: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data_local_dir>/polychat/sessions`, or `cache/sessions` when the
    /// platform has no data directory.
    pub fn default_location() -> Self {
        let root = dirs::data_local_dir()
            .map(|dir| dir.join("polychat").join("sessions"))
            .unwrap_or_else(|| PathBuf::from("cache").join("sessions"));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(session_id)))
    }
}

/// Make an id safe to use as a file name.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sort_recent_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.last_update.cmp(&a.last_update));
}

impl SessionStorage for JsonFileStorage {
    fn load_all(&self) -> Result<Vec<Session>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) => sessions.push(session),
                // One corrupt file should not hide the others.
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable session"),
            }
        }
        sort_recent_first(&mut sessions);
        debug!(root = %self.root.display(), count = sessions.len(), "loaded sessions");
        Ok(sessions)
    }

    fn save(&self, session: &Session) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(session)?;
        fs::write(self.path_for(&session.id), json)?;
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        let path = self.path_for(session_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStorage for MemoryStorage {
    fn load_all(&self) -> Result<Vec<Session>, StorageError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    fn save(&self, session: &Session) -> Result<(), StorageError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_key_replaces_path_characters() {
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_key("abc-123_x"), "abc-123_x");
    }

    #[test]
    fn memory_storage_orders_by_last_update() {
        let storage = MemoryStorage::new();
        let older = Session {
            last_update: 1,
            ..Session::default()
        };
        let newer = Session {
            last_update: 2,
            ..Session::default()
        };
        storage.save(&older).unwrap();
        storage.save(&newer).unwrap();
        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded[0].id, newer.id);

        storage.delete(&newer.id).unwrap();
        storage.delete("missing").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let storage = JsonFileStorage::new("definitely/not/here/polychat");
        assert!(storage.load_all().unwrap().is_empty());
    }
}
