use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, broadcast};

/// Storage scopes mirror the host's two key-value areas: `Sync` holds user
/// configuration that roams with the account, `Local` holds per-device state
/// (activity snapshot, event log, one-shot flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Sync,
    Local,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Sync => "sync",
            Scope::Local => "local",
        }
    }
}

/// Notification published after every successful write or removal. Surfaces
/// subscribe to re-render; dropping the receiver ends the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub scope: Scope,
    pub key: String,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, scope: Scope, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, scope: Scope, key: &str, value: Value) -> anyhow::Result<()>;
    async fn remove(&self, scope: Scope, key: &str) -> anyhow::Result<()>;
    /// Change feed. Best effort: slow readers may observe a lag error and
    /// should resynchronize from the store.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    scope: Scope,
    key: &str,
) -> anyhow::Result<Option<T>> {
    let Some(value) = store.get(scope, key).await? else {
        return Ok(None);
    };
    let typed = serde_json::from_value(value)
        .with_context(|| format!("parse stored value: {}/{key}", scope.as_str()))?;
    Ok(Some(typed))
}

pub async fn set_json<T: serde::Serialize>(
    store: &dyn KeyValueStore,
    scope: Scope,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let value = serde_json::to_value(value)
        .with_context(|| format!("serialize value for: {}/{key}", scope.as_str()))?;
    store.set(scope, key, value).await
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Process-local store used by tests and ephemeral runs.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(Scope, String), Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn publish(&self, scope: Scope, key: &str) {
        let _ = self.changes.send(StorageChange {
            scope,
            key: key.to_string(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, scope: Scope, key: &str) -> anyhow::Result<Option<Value>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&(scope, key.to_string())).cloned())
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.lock().await.insert((scope, key.to_string()), value);
        self.publish(scope, key);
        Ok(())
    }

    async fn remove(&self, scope: Scope, key: &str) -> anyhow::Result<()> {
        let removed = self.entries.lock().await.remove(&(scope, key.to_string())).is_some();
        if removed {
            self.publish(scope, key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Durable store: one JSON object file per scope under the data directory.
/// Writes are read-modify-write under a lock and land via atomic rename.
pub struct JsonFileStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    fn scope_path(&self, scope: Scope) -> PathBuf {
        self.base_dir.join(format!("{}.json", scope.as_str()))
    }

    async fn read_scope(&self, scope: Scope) -> anyhow::Result<BTreeMap<String, Value>> {
        let path = self.scope_path(scope);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read store: {}", path.display()));
            }
        };
        serde_json::from_slice(&bytes).with_context(|| format!("parse store: {}", path.display()))
    }

    async fn write_scope(
        &self,
        scope: Scope,
        entries: &BTreeMap<String, Value>,
    ) -> anyhow::Result<()> {
        let path = self.scope_path(scope);
        write_json_atomic(&path, entries).await
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, scope: Scope, key: &str) -> anyhow::Result<Option<Value>> {
        let entries = self.read_scope(scope).await?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, scope: Scope, key: &str, value: Value) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_scope(scope).await?;
        entries.insert(key.to_string(), value);
        self.write_scope(scope, &entries).await?;
        let _ = self.changes.send(StorageChange {
            scope,
            key: key.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, scope: Scope, key: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_scope(scope).await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_scope(scope, &entries).await?;
        let _ = self.changes.send(StorageChange {
            scope,
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create store dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize store")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp store: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp store to final: {}", path.display()))?;
    Ok(())
}
