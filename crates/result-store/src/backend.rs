use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Result, StoreError};

/// Key/value persistence the store is layered on, shaped like the host's
/// extension storage area: whole JSON values per key.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// Volatile backend, optionally with a byte quota and an outage switch so
/// failure paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Value>>,
    quota_bytes: Option<usize>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn raw(&self, key: &str) -> Option<Value> {
        self.entries.lock().await.get(key).cloned()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_online()?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, value)| existing.len() + value.to_string().len())
                .sum();
            let needed = others + key.len() + value.to_string().len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Single JSON document on disk holding every key. Writes go to a sibling
/// temp file first and are renamed into place.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(Map::new()),
            Ok(data) => match serde_json::from_str::<Value>(&data)? {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Document a write starts from. An undecodable file is replaced rather
    /// than wedging every later write.
    async fn document_for_write(&self) -> Result<Map<String, Value>> {
        match self.read_document().await {
            Err(StoreError::Serialization(err)) => {
                warn!(target: "result_store", path = %self.path.display(), error = %err, "replacing corrupt store document");
                Ok(Map::new())
            }
            other => other,
        }
    }

    async fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let payload = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.io.lock().await;
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.io.lock().await;
        let mut document = self.document_for_write().await?;
        document.insert(key.to_string(), value);
        self.write_document(&document).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.io.lock().await;
        let mut document = self.document_for_write().await?;
        for key in keys {
            document.remove(*key);
        }
        self.write_document(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_backend_enforces_quota() {
        let backend = MemoryBackend::with_quota(32);
        backend.set("a", json!("small")).await.unwrap();
        let err = backend
            .set("b", json!("this value is far too large for the quota"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert!(backend.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_backend_can_go_offline() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.get("a").await,
            Err(StoreError::Unavailable(_))
        ));
        backend.set_offline(false);
        assert!(backend.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let backend = FileBackend::new(&path);
        backend.set("settings", json!({ "theme": "dark" })).await.unwrap();
        backend.set("summaries", json!({})).await.unwrap();
        backend.remove(&["summaries"]).await.unwrap();

        let reopened = FileBackend::new(&path);
        assert_eq!(
            reopened.get("settings").await.unwrap(),
            Some(json!({ "theme": "dark" }))
        );
        assert!(reopened.get("summaries").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backend_reports_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let backend = FileBackend::new(&path);
        assert!(matches!(
            backend.get("settings").await,
            Err(StoreError::Serialization(_))
        ));
    }
}
