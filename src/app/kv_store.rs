use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

/// Logical keys of the persisted reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    OwnedChapters,
    ReadingProgress,
    Cart,
    RecentlyViewed,
}

impl StoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OwnedChapters => "owned_chapters",
            Self::ReadingProgress => "reading_progress",
            Self::Cart => "cart",
            Self::RecentlyViewed => "recently_viewed",
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: StoreKey) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: StoreKey, value: &[u8]) -> anyhow::Result<()>;
}

/// One JSON file per key under `<base_dir>/<namespace>/`.
#[derive(Debug, Clone)]
pub struct LocalFsKvStore {
    base_dir: PathBuf,
    namespace: String,
}

impl LocalFsKvStore {
    pub fn new(base_dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespace: namespace.into(),
        }
    }

    fn namespace_dir(&self) -> PathBuf {
        self.base_dir.join(&self.namespace)
    }

    pub fn key_path(&self, key: StoreKey) -> PathBuf {
        self.namespace_dir().join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl KvStore for LocalFsKvStore {
    async fn get(&self, key: StoreKey) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    async fn set(&self, key: StoreKey, value: &[u8]) -> anyhow::Result<()> {
        write_atomic(&self.key_path(key), value)
            .await
            .with_context(|| format!("write {}", key.as_str()))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    values: Mutex<HashMap<StoreKey, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: StoreKey) -> anyhow::Result<Option<Vec<u8>>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        Ok(values.get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: &[u8]) -> anyhow::Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        values.insert(key, value.to_vec());
        Ok(())
    }
}

/// Loads a value, falling back to its default when absent, unreadable or corrupt.
pub async fn load_or_default<T>(kv: &dyn KvStore, key: StoreKey) -> T
where
    T: DeserializeOwned + Default,
{
    let bytes = match kv.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return T::default(),
        Err(err) => {
            tracing::warn!(key = key.as_str(), ?err, "storage read failed; using empty state");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key = key.as_str(), %err, "discarding corrupt stored state");
            T::default()
        }
    }
}

pub async fn save<T: Serialize>(kv: &dyn KvStore, key: StoreKey, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    kv.set(key, &data).await
}
