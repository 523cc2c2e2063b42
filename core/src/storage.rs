use directories::BaseDirs;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Durable key holding the raw bearer token.
pub const TOKEN_KEY: &str = "jwt_token";
/// Durable key holding the JSON-serialized user profile.
pub const USER_KEY: &str = "user_data";

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize storage document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String-valued key/value storage that survives process restarts.
///
/// Writes never fail from the caller's point of view: a backend that cannot
/// persist logs the failure and keeps serving the value from memory, the same
/// way a browser's local storage degrades when its quota is exhausted.
pub trait DurableStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

pub type SharedStorage = Arc<dyn DurableStorage>;

/// Reads the persisted bearer token. Empty strings count as absent.
pub fn durable_token(storage: &dyn DurableStorage) -> Option<String> {
    storage.get(TOKEN_KEY).filter(|token| !token.is_empty())
}

/// Removes every piece of persisted session state.
pub fn clear_session(storage: &dyn DurableStorage) {
    storage.remove(TOKEN_KEY);
    storage.remove(USER_KEY);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Storage backed by a single JSON object on disk.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens (or lazily creates) the storage document at `path`.
    ///
    /// A document that is not a JSON object of strings is discarded with a
    /// warning; the next write replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "discarding unreadable storage document");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Opens the storage document in the per-user data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(default_storage_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = serde_json::to_vec_pretty(entries)?;
        fs::write(&self.path, serialized).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) {
        let mut entries = self.entries.write();
        apply(&mut entries);
        if let Err(err) = self.persist(&entries) {
            error!(%err, "failed to persist storage document");
        }
    }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.mutate(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        });
    }

    fn remove(&self, key: &str) {
        self.mutate(|entries| {
            entries.remove(key);
        });
    }
}

pub fn default_storage_path() -> PathBuf {
    match BaseDirs::new() {
        Some(base) => base.data_dir().join("ragchat").join("storage.json"),
        None => PathBuf::from(".ragchat").join("storage.json"),
    }
}
