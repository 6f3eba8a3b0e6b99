use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::core::DataSchema;
use crate::sync::github::GithubConfig;

pub const LOCAL_DATA_KEY: &str = "clean-nav-local-data";
pub const GITHUB_CONFIG_KEY: &str = "clean-nav-github-config";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode value: {0}")]
    Json(#[from] serde_json::Error),
}

/// String-keyed durable slots, one JSON file per key.
///
/// Reads never fail: a missing or unparseable slot is reported as absent.
/// Typed writes are best-effort and only log on failure.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        let path = self.slot_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write a slot atomically: the new content lands in a sibling temp file
    /// and is renamed over the old one.
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.slot_path(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.slot_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let content = self.get_item(key)?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring unreadable slot {}: {}", key, e);
                None
            }
        }
    }

    pub fn write<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.set_item(key, &json) {
            log::error!("Failed to save {}: {}", key, e);
        }
    }

    pub fn read_document(&self) -> Option<DataSchema> {
        self.read(LOCAL_DATA_KEY)
    }

    pub fn write_document(&self, document: &DataSchema) {
        self.write(LOCAL_DATA_KEY, document);
    }

    pub fn read_github_config(&self) -> Option<GithubConfig> {
        self.read(GITHUB_CONFIG_KEY)
    }

    pub fn write_github_config(&self, config: &GithubConfig) {
        self.write(GITHUB_CONFIG_KEY, config);
    }

    pub fn clear_github_config(&self) {
        if let Err(e) = self.remove_item(GITHUB_CONFIG_KEY) {
            log::error!("Failed to clear GitHub config: {}", e);
        }
    }
}
