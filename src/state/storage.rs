//! Durable storage ports.
//!
//! A [`StoragePort`] is a plain string key-value store. The
//! [`StateStore`](super::StateStore) decides what goes in (only persistent
//! entries) and under which namespaced key.
//!
//! - [`MemoryStorage`] keeps records in a map. Share one `Arc` between two
//!   stores to simulate a restart; give it a byte quota to exercise
//!   quota-exceeded failures.
//! - [`FileStorage`] keeps all records in one JSON document on disk,
//!   rewritten atomically (tmp file + rename) on every change. A change
//!   reaches its in-memory map only after the file is renamed into place,
//!   and runs to completion even if the caller stops waiting.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use crate::{KeepsakeError, Result, lock};

/// Durable string key-value storage.
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Port name for logging/debugging.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a record. On error nothing is changed.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove a record. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All stored keys, in no particular order.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory storage port.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size (keys plus values, in bytes) of stored records.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            records: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut records = lock(&self.records);
        if let Some(quota) = self.quota_bytes {
            let others: usize = records
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(others);
            if needed > available {
                return Err(KeepsakeError::QuotaExceeded { needed, available });
            }
        }
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        lock(&self.records).remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.records).keys().cloned().collect())
    }
}

/// File-backed storage port: one JSON object of `key -> record`.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    records: Arc<tokio::sync::Mutex<BTreeMap<String, String>>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is
    /// logged and also starts empty; it is replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt state file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(KeepsakeError::Storage(format!(
                    "failed to read state file {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            records: Arc::new(tokio::sync::Mutex::new(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the records, write the copy to disk and
    /// only then swap it in. `change` returns `false` when there is nothing
    /// to write.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send + 'static,
    {
        let path = self.path.clone();
        let records = Arc::clone(&self.records);
        let task = tokio::spawn(async move {
            let mut current = records.lock_owned().await;
            let mut next = current.clone();
            if !change(&mut next) {
                return Ok::<(), KeepsakeError>(());
            }
            flush(&path, &next).await?;
            *current = next;
            Ok::<(), KeepsakeError>(())
        });
        task.await
            .map_err(|e| KeepsakeError::Storage(format!("state write task failed: {e}")))?
    }
}

/// Write the full record map (atomic write via tmp + rename).
async fn flush(path: &Path, records: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            KeepsakeError::Storage(format!(
                "failed to create state dir {}: {e}",
                parent.display()
            ))
        })?;
    }

    let json = serde_json::to_string_pretty(records)
        .map_err(|e| KeepsakeError::Storage(format!("failed to serialize state: {e}")))?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(|e| {
        KeepsakeError::Storage(format!(
            "failed to write state file {}: {e}",
            tmp_path.display()
        ))
    })?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        KeepsakeError::Storage(format!(
            "failed to rename state file {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

#[async_trait]
impl StoragePort for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.commit(move |records| {
            records.insert(key, value);
            true
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.commit(move |records| records.remove(&key).is_some()).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }
}
