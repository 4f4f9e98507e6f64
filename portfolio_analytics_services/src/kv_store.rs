use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};

use crate::{AnalyticsError, DATA_DIR};

/// Durable key-value storage backing the fallback paths. One JSON file per
/// key, read and written whole.
#[derive(Clone)]
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, AnalyticsError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|_| AnalyticsError::Storage(format!("Failed to create storage directory: {dir:?}")))?;
        }

        Ok(KvStore { dir })
    }

    /// Opens the store under the project data directory.
    pub async fn open_default() -> Result<Self, AnalyticsError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|_| AnalyticsError::Storage("Failed to locate project root".to_string()))?;
        Self::open(root.join(DATA_DIR)).await
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AnalyticsError> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| AnalyticsError::Storage(format!("Failed to read key file: {path:?}")))?;

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|_| AnalyticsError::Storage(format!("Malformed value stored for key {key}")))
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AnalyticsError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|_| AnalyticsError::Storage(format!("Failed to serialize value for key {key}")))?;

        let path = self.key_path(key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|_| AnalyticsError::Storage(format!("Failed to write key file: {path:?}")))
    }

    /// Removing an absent key is not an error.
    pub async fn remove(&self, key: &str) -> Result<(), AnalyticsError> {
        let path = self.key_path(key);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|_| AnalyticsError::Storage(format!("Failed to remove key file: {path:?}")))?;
        }

        Ok(())
    }
}

#[tokio::test]
async fn set_get_remove_roundtrip() {
    let kv = KvStore::open(crate::test_data_dir("kv")).await.unwrap();

    assert!(kv.get::<Vec<String>>("missing").await.unwrap().is_none());

    let values = vec!["a".to_string(), "b".to_string()];
    kv.set("list", &values).await.unwrap();
    assert_eq!(kv.get::<Vec<String>>("list").await.unwrap().unwrap(), values);

    kv.remove("list").await.unwrap();
    assert!(kv.get::<Vec<String>>("list").await.unwrap().is_none());

    // Idempotent on an already-removed key.
    kv.remove("list").await.unwrap();
}

#[tokio::test]
async fn get_rejects_malformed_value() {
    let dir = crate::test_data_dir("kv_malformed");
    let kv = KvStore::open(&dir).await.unwrap();

    tokio::fs::write(dir.join("broken.json"), b"{not json")
        .await
        .unwrap();

    assert!(kv.get::<Vec<String>>("broken").await.is_err());
}
