//! In-memory storage provider.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use conduit_common::{Error, ObjectPath, Result, TransferOptions};

use crate::provider::{Backend, Metadata, Provider};
use crate::stream::StreamObject;

/// Stored object.
#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    metadata: Metadata,
}

type Store = Arc<RwLock<HashMap<String, Entry>>>;

/// Named stores shared by every provider created with the same `store`.
static NAMED_STORES: LazyLock<Mutex<HashMap<String, Store>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Construction options for [`MemoryProvider`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Name of a process-wide store to attach to. A private store is
    /// created when absent.
    #[serde(default)]
    pub store: Option<String>,
}

/// In-memory storage provider.
///
/// Useful for testing and development. All data is stored in memory. Any
/// two memory providers can copy and move between each other natively.
///
/// Transfer options: `path` (required).
pub struct MemoryProvider {
    storage: Store,
}

impl MemoryProvider {
    /// Create a provider with a private, empty store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a provider attached to the process-wide store `name`.
    pub fn shared(name: &str) -> Self {
        let mut stores = NAMED_STORES.lock().unwrap_or_else(PoisonError::into_inner);
        let storage = stores.entry(name.to_string()).or_default().clone();
        Self { storage }
    }

    /// Check whether an object exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        ObjectPath::parse(path)
            .map(|p| self.read().contains_key(&Self::path_to_key(&p)))
            .unwrap_or(false)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn path_to_key(path: &ObjectPath) -> String {
        path.to_string_path()
    }

    fn object_key(options: &TransferOptions) -> Result<(ObjectPath, String)> {
        let path = options.path()?;
        if path.is_root() {
            return Err(Error::InvalidInput("Object path cannot be root".to_string()));
        }
        let key = Self::path_to_key(&path);
        Ok((path, key))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_metadata(path: &ObjectPath, data: &Bytes, content_type: String) -> Metadata {
        Metadata {
            id: Uuid::new_v4().to_string(),
            name: path.name().unwrap_or("/").to_string(),
            size: Some(data.len() as u64),
            content_type,
            modified: Utc::now(),
            etag: Some(Uuid::new_v4().to_string()),
            provider_data: None,
        }
    }

    fn peer<'a>(&self, dest: &'a dyn Provider) -> Result<&'a MemoryProvider> {
        dest.as_any()
            .downcast_ref::<MemoryProvider>()
            .ok_or_else(|| Error::Unsupported(format!("memory cannot reach {}", dest.name())))
    }

    /// Store a copy of `entry` under `path` in this provider.
    fn insert_copy(&self, path: &ObjectPath, entry: &Entry) -> Metadata {
        let metadata = Self::new_metadata(path, &entry.data, entry.metadata.content_type.clone());
        self.write().insert(
            Self::path_to_key(path),
            Entry {
                data: entry.data.clone(),
                metadata: metadata.clone(),
            },
        );
        metadata
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryProvider {
    type Config = MemoryConfig;

    fn from_config(config: Self::Config) -> Result<Self> {
        Ok(match config.store {
            Some(name) => Self::shared(&name),
            None => Self::new(),
        })
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn download(&self, options: &TransferOptions) -> Result<StreamObject> {
        let (path, key) = Self::object_key(options)?;
        let entry = self
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", path)))?;

        Ok(StreamObject::from_bytes(
            entry.data,
            Some(entry.metadata.content_type),
        ))
    }

    async fn upload(&self, obj: StreamObject, options: &TransferOptions) -> Result<Metadata> {
        let (path, key) = Self::object_key(options)?;
        let content_type = obj.content_type.clone();
        let data = obj.collect().await?;

        let metadata = Self::new_metadata(&path, &data, content_type);
        self.write().insert(
            key,
            Entry {
                data,
                metadata: metadata.clone(),
            },
        );

        Ok(metadata)
    }

    async fn delete(&self, options: &TransferOptions) -> Result<()> {
        let (_, key) = Self::object_key(options)?;
        self.write().remove(&key);
        Ok(())
    }

    fn can_intra_copy(&self, other: &dyn Provider) -> bool {
        other.as_any().is::<MemoryProvider>()
    }

    fn can_intra_move(&self, other: &dyn Provider) -> bool {
        other.as_any().is::<MemoryProvider>()
    }

    async fn intra_copy(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        let peer = self.peer(dest)?;
        let (from, from_key) = Self::object_key(source_options)?;
        let (to, _) = Self::object_key(dest_options)?;

        let entry = self
            .read()
            .get(&from_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;

        Ok(peer.insert_copy(&to, &entry))
    }

    async fn intra_move(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        let peer = self.peer(dest)?;
        let (from, from_key) = Self::object_key(source_options)?;
        let (to, _) = Self::object_key(dest_options)?;

        let entry = self
            .write()
            .remove(&from_key)
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;

        Ok(peer.insert_copy(&to, &entry))
    }
}
