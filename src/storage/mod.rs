// Durable key-value storage for the workspace documents. A directory of
// JSON files or an embedded SQLite database sits behind `KeyValueStore`;
// `negotiate_backend` picks one once per process.

mod fs;
mod sqlite;

pub use fs::DirectoryBackend;
pub use sqlite::SqliteBackend;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// The three documents making up a persisted workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Sessions,
    Settings,
    Instructions,
}

impl DocumentKey {
    pub const ALL: [DocumentKey; 3] = [
        DocumentKey::Sessions,
        DocumentKey::Settings,
        DocumentKey::Instructions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DocumentKey::Sessions => "sessions",
            DocumentKey::Settings => "settings",
            DocumentKey::Instructions => "instructions",
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the backends live on disk.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory for the primary JSON-file backend.
    pub documents_dir: PathBuf,
    /// Database file for the fallback backend. `None` keeps it in memory.
    pub database_path: Option<PathBuf>,
    /// Skip the probe and go straight to the fallback.
    pub force_fallback: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Directory(DirectoryBackend),
    Sqlite(SqliteBackend),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Directory,
    Sqlite,
}

impl StorageBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            StorageBackend::Directory(_) => BackendKind::Directory,
            StorageBackend::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    async fn read(&self, name: &str) -> Result<Option<Value>, anyhow::Error> {
        match self {
            StorageBackend::Directory(backend) => backend.read(name).await,
            StorageBackend::Sqlite(backend) => backend.read(name).await,
        }
    }

    async fn write(&self, name: &str, value: &Value) -> Result<(), anyhow::Error> {
        match self {
            StorageBackend::Directory(backend) => backend.write(name, value).await,
            StorageBackend::Sqlite(backend) => backend.write(name, value).await,
        }
    }

    async fn write_batch(&self, entries: &[(&str, Value)]) -> Result<(), anyhow::Error> {
        match self {
            StorageBackend::Directory(backend) => backend.write_batch(entries).await,
            StorageBackend::Sqlite(backend) => backend.write_batch(entries).await,
        }
    }
}

/// Picks the backend for this process run.
///
/// The directory backend is probed by creating and deleting a marker file.
/// On any failure the SQLite backend is used for the rest of the run; the
/// probe is never retried. If the database file cannot be opened either, an
/// in-memory database keeps the session usable.
pub async fn negotiate_backend(config: &StorageConfig) -> Result<StorageBackend, anyhow::Error> {
    if !config.force_fallback {
        let primary = DirectoryBackend::new(&config.documents_dir);
        match primary.probe().await {
            Ok(()) => {
                log::info!(
                    "Using document directory {}",
                    config.documents_dir.display()
                );
                return Ok(StorageBackend::Directory(primary));
            }
            Err(e) => {
                log::warn!(
                    "Document directory unavailable, falling back to SQLite: {:#}",
                    e
                );
            }
        }
    } else {
        log::info!("Primary storage disabled by configuration, using SQLite");
    }

    if let Some(path) = &config.database_path {
        match SqliteBackend::open(path).await {
            Ok(backend) => return Ok(StorageBackend::Sqlite(backend)),
            Err(e) => log::error!(
                "Failed to open fallback database {}: {:#}. Using in-memory storage.",
                path.display(),
                e
            ),
        }
    }
    Ok(StorageBackend::Sqlite(SqliteBackend::in_memory().await?))
}

/// Get/put of named JSON documents over the negotiated backend.
///
/// Reads never fail: a missing, unreadable or corrupt document is reported as
/// absent (and logged) so callers fall back to defaults.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    backend: StorageBackend,
}

impl KeyValueStore {
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn read(&self, name: &str) -> Option<Value> {
        match self.backend.read(name).await {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to read document '{}': {:#}", name, e);
                None
            }
        }
    }

    /// Reads and decodes a document; a shape mismatch is logged and treated as absent.
    pub async fn read_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.read(name).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                log::error!("Document '{}' has an unexpected shape: {}", name, e);
                None
            }
        }
    }

    pub async fn write(&self, name: &str, value: &Value) -> Result<(), anyhow::Error> {
        log::debug!("Writing document '{}'", name);
        self.backend.write(name, value).await.map_err(|e| {
            log::error!("Failed to write document '{}': {:#}", name, e);
            e
        })
    }

    pub async fn write_batch(&self, entries: &[(&str, Value)]) -> Result<(), anyhow::Error> {
        log::debug!("Writing {} documents as one batch", entries.len());
        self.backend.write_batch(entries).await.map_err(|e| {
            log::error!("Failed to write document batch: {:#}", e);
            e
        })
    }
}
