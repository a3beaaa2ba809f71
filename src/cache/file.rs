//! File-backed durable tier
//!
//! One JSON file per key under `<dir>/entries/`. File names are the SHA-256 of
//! the tier key so arbitrary cache keys map to safe paths. Writes go to a temp
//! file first and are renamed into place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::entry::CachedRecord;
use super::error::CacheError;
use super::traits::{CacheObserver, CacheTier};

/// On-disk layout of one entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    key: String,
    record: CachedRecord,
}

/// Convert a tier key to a SHA256 hash for use as a filename
fn key_to_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persistent tier storing records as files
pub struct FileTier {
    entries_dir: PathBuf,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl FileTier {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            entries_dir: cache_dir.as_ref().join("entries"),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.entries_dir.join(format!("{}.json", key_to_hash(key)))
    }

    async fn write_file_atomic(&self, path: &Path, data: Vec<u8>) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.entries_dir).await?;

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &data).await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheTier for FileTier {
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, CacheError> {
        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let stored: StoredFile = serde_json::from_slice(&bytes)?;
        // Hash collision or foreign file
        if stored.key != key {
            return Ok(None);
        }
        Ok(Some(stored.record))
    }

    async fn set(&self, key: &str, record: CachedRecord) -> Result<(), CacheError> {
        let stored = StoredFile {
            key: key.to_string(),
            record,
        };
        let data = serde_json::to_vec(&stored)?;
        self.write_file_atomic(&self.path_for(key), data).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.entries_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json" || ext == "tmp") {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    fn observer(&self) -> Option<&dyn CacheObserver> {
        self.observer.as_deref()
    }
}
