//! Versioned JSON persistence under `<config>/.storage/`

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration required for {key}: from {from} to {to}")]
    MigrationRequired { key: String, from: u32, to: u32 },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk envelope
///
/// ```json
/// { "version": 1, "minor_version": 1, "key": "core.entity_registry", "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// A type persisted as one storage file
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;

    /// Convert data written by an older major version
    fn migrate(data: serde_json::Value, from_version: u32) -> StorageResult<Self> {
        let _ = data;
        Err(StorageError::MigrationRequired {
            key: Self::KEY.to_string(),
            from: from_version,
            to: Self::VERSION,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Storage rooted at `<config_dir>/.storage`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a stored value, migrating older major versions
    ///
    /// Returns None if nothing has been stored under the key yet.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<T>> {
        let path = self.file_path(T::KEY);
        if !path.exists() {
            debug!(key = T::KEY, "Storage file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let raw: StorageFile<serde_json::Value> = serde_json::from_str(&content)?;

        if raw.version != T::VERSION {
            debug!(key = T::KEY, from = raw.version, "Migrating storage file");
            return T::migrate(raw.data, raw.version).map(Some);
        }
        if raw.minor_version < T::MINOR_VERSION {
            warn!(
                key = T::KEY,
                "Storage has older minor version ({} < {})",
                raw.minor_version,
                T::MINOR_VERSION
            );
        }

        Ok(Some(serde_json::from_value(raw.data)?))
    }

    /// Save a value, writing a temp file first and renaming it into place
    pub async fn save<T: Storable>(&self, data: &T) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let file = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_string(),
            data,
        };
        let path = self.file_path(T::KEY);
        let temp_path = self.file_path(&format!("{}.tmp", T::KEY));

        fs::write(&temp_path, serde_json::to_string_pretty(&file)?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = T::KEY, "Saved storage file");
        Ok(())
    }

    pub async fn delete<T: Storable>(&self) -> StorageResult<()> {
        let path = self.file_path(T::KEY);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
