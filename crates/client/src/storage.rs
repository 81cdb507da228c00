//! Persistent key/value storage.
//!
//! Values are stored as JSON files in the platform-appropriate config directory:
//!   - Linux: `~/.config/captain/`
//!   - macOS: `~/Library/Application Support/captain/`
//!   - Windows: `%APPDATA%\captain\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

const APP_DIR: &str = "captain";

/// JSON-file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Store rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store in the platform config directory, if one exists.
    pub fn default_location() -> Option<Self> {
        Some(Self::at(dirs::config_dir()?.join(APP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save a value to persistent storage.
    ///
    /// Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize stored value");
                return false;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            tracing::warn!(root = %self.root.display(), error = %e, "failed to create storage dir");
            return false;
        }
        match std::fs::write(self.file_path(key), json) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to write stored value");
                false
            }
        }
    }

    /// Load a value from persistent storage.
    ///
    /// Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = std::fs::read_to_string(self.file_path(key)).ok()?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable stored value");
                None
            }
        }
    }

    /// Remove a value from persistent storage.
    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }

    /// Check if a key exists in storage.
    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).is_file()
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.root.join(format!("{safe_key}.json"))
    }
}
