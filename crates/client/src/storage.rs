//! Durable key/value storage for client state.
//!
//! Values are JSON files in a directory, by default the platform config dir:
//!   - Linux: `~/.config/chat-client/`
//!   - macOS: `~/Library/Application Support/chat-client/`
//!   - Windows: `%APPDATA%\chat-client\`
//!
//! An in-memory backend exists for tests and throwaway sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

const APP_DIR: &str = "chat-client";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no config directory available on this platform")]
    NoConfigDir,
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub enum Storage {
    Disk(PathBuf),
    Memory(Arc<Mutex<HashMap<String, String>>>),
}

impl Storage {
    /// Storage under the platform config directory.
    pub fn platform_default() -> Result<Self, StorageError> {
        let dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(Storage::Disk(dir.join(APP_DIR)))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Storage::Disk(dir.into())
    }

    pub fn memory() -> Self {
        Storage::Memory(Arc::default())
    }

    /// Save a value under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        match self {
            Storage::Disk(dir) => {
                std::fs::create_dir_all(dir)?;
                std::fs::write(file_path(dir, key), json)?;
            }
            Storage::Memory(map) => {
                lock(map).insert(key.to_string(), json);
            }
        }
        Ok(())
    }

    /// Load a value. Missing keys and undecodable contents both yield `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = match self {
            Storage::Disk(dir) => std::fs::read_to_string(file_path(dir, key)).ok()?,
            Storage::Memory(map) => lock(map).get(key).cloned()?,
        };
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable stored value");
                None
            }
        }
    }

    /// Remove a value. Removing a missing key is not an error.
    pub fn remove(&self, key: &str) {
        match self {
            Storage::Disk(dir) => {
                let path = file_path(dir, key);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove stored value");
                    }
                }
            }
            Storage::Memory(map) => {
                lock(map).remove(key);
            }
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        match self {
            Storage::Disk(dir) => file_path(dir, key).exists(),
            Storage::Memory(map) => lock(map).contains_key(key),
        }
    }
}

fn file_path(dir: &Path, key: &str) -> PathBuf {
    // Sanitize key to be a valid filename
    let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
    dir.join(format!("{safe_key}.json"))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::in_dir(dir.path().join("nested"));

        assert!(!storage.exists("token"));
        storage.save("token", &"abc".to_string()).unwrap();
        assert!(storage.exists("token"));
        assert_eq!(storage.load::<String>("token").as_deref(), Some("abc"));

        storage.remove("token");
        assert!(!storage.exists("token"));
        assert_eq!(storage.load::<String>("token"), None);

        // removing twice is fine
        storage.remove("token");
    }

    #[test]
    fn keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::in_dir(dir.path());
        storage.save("a/b:c", &1u32).unwrap();
        assert!(dir.path().join("a_b_c.json").exists());
        assert_eq!(storage.load::<u32>("a/b:c"), Some(1));
    }

    #[test]
    fn corrupt_value_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.json"), "{not json").unwrap();
        let storage = Storage::in_dir(dir.path());
        assert_eq!(storage.load::<String>("token"), None);
    }

    #[test]
    fn memory_clones_share_state() {
        let storage = Storage::memory();
        let other = storage.clone();
        storage.save("k", &"v").unwrap();
        assert_eq!(other.load::<String>("k").as_deref(), Some("v"));
        other.remove("k");
        assert!(!storage.exists("k"));
    }
}
