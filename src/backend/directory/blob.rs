/**
 * Blob Storage
 *
 * Object storage for document assets uploaded over the `resource`,
 * `thumbnail` and `docupload` channels. Keys are `/`-separated paths below
 * the document's storage prefix.
 *
 * - `FsBlobStorage` - files below a root directory (`tokio::fs`)
 * - `InMemoryBlobStorage` - a map, for tests
 */

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::error::{BackendError, BackendResult};

/// Object storage
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<()>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    async fn delete(&self, key: &str) -> BackendResult<()>;
}

pub type SharedBlobs = Arc<dyn BlobStorage>;

/// Reject keys that would escape the storage root
fn validate_key(key: &str) -> BackendResult<()> {
    let path = Path::new(key);
    let escapes = key.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(BackendError::protocol(format!("invalid object key '{}'", key)));
    }
    Ok(())
}

/// Blob storage on the local filesystem
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> BackendResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_error(action: &str, key: &str, err: std::io::Error) -> BackendError {
    BackendError::store(format!("failed to {} '{}': {}", action, key, err))
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> BackendResult<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error("create directory for", key, err))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|err| io_error("write", key, err))?;
        tracing::debug!(key, bytes = data.len(), "blob stored");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        // list the directory holding the prefix, then filter by name
        let (dir_key, _) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let dir = if dir_key.is_empty() {
            self.root.clone()
        } else {
            self.path_of(dir_key)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error("list", prefix, err)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| io_error("list", prefix, err))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| io_error("list", prefix, err))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .filter_map(|component| component.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.path_of(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("delete", key, err)),
        }
    }
}

/// Stored object of the in-memory storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Blob storage in a map
#[derive(Default)]
pub struct InMemoryBlobStorage {
    objects: Mutex<BTreeMap<String, StoredBlob>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredBlob> {
        let objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<()> {
        validate_key(key)?;
        let mut objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.remove(key);
        Ok(())
    }
}
