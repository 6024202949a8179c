use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use crate::{DocumentStore, Result};
use crate::engine::{MemDocumentStore, MemScopedStore, Persistence};
use crate::sdk::{Database, DatabaseSchema, Storage};

/// Subdirectory of the data directory holding the persistent key-value area.
pub const KV_DIR: &str = "kv";
/// Subdirectory of the data directory holding one snapshot per database.
pub const DATABASES_DIR: &str = "databases";

/// Settings for [`new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Where persistent data lives. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Size limit of each key-value area, in bytes.
    pub quota_bytes: Option<usize>,
}

impl Config {
    /// Reads `SATCHEL_DATA_DIR` and `SATCHEL_QUOTA_BYTES`.
    pub fn from_env() -> Self {
        let data_dir = env::var("SATCHEL_DATA_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let quota_bytes = match env::var("SATCHEL_QUOTA_BYTES") {
            Ok(raw) if !raw.is_empty() => match raw.parse() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    log::warn!("Ignoring SATCHEL_QUOTA_BYTES={:?}: {}", raw, e);
                    None
                }
            },
            _ => None,
        };

        Self { data_dir, quota_bytes }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }
}

/// A browsing context's complete set of storage facilities.
pub struct Satchel {
    volatile: Arc<MemScopedStore>,
    persistent: Arc<MemScopedStore>,
    documents: MemDocumentStore,
    storage: Storage,
}

impl Satchel {
    fn assemble(volatile: MemScopedStore, persistent: MemScopedStore, documents: MemDocumentStore) -> Self {
        let volatile = Arc::new(volatile);
        let persistent = Arc::new(persistent);
        let storage = Storage::new(volatile.clone(), persistent.clone());
        Self { volatile, persistent, documents, storage }
    }

    /// The scoped key-value stores.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The document store backend.
    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.documents.clone())
    }

    /// The persistent area, for subscribing to changes made by other contexts.
    pub fn persistent_area(&self) -> &MemScopedStore {
        &self.persistent
    }

    /// Creates an unopened handle on the database described by `schema`.
    pub fn database(&self, schema: DatabaseSchema) -> Database {
        Database::new(self.documents(), schema)
    }

    /// Another browsing context of the same origin: shared persistent area and
    /// databases, fresh volatile area.
    pub fn open_context(&self) -> Self {
        let volatile = self.volatile.open_context();
        volatile.set_quota(self.volatile.quota());
        Self::assemble(volatile, self.persistent.open_context(), self.documents.clone())
    }

    /// Waits for pending background writes.
    pub async fn wait(&self) {
        self.documents.wait().await;
    }
}

/// Initializes every storage facility from `config`.
///
/// With a data directory, the persistent area is written through to
/// `<data_dir>/kv` and databases are snapshotted under `<data_dir>/databases`.
/// Without one, everything lives in memory.
///
/// # Examples
///
/// ```no_run
/// use satchel_store::sdk;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let satchel = sdk::new(sdk::Config::from_env())?;
///     let prefs = satchel.storage().persistent().pool("prefs")?;
///     prefs.set("theme", serde_json::json!("dark"))?;
///     Ok(())
/// }
/// ```
pub fn new(config: Config) -> Result<Satchel> {
    let (persistent, documents) = match &config.data_dir {
        Some(dir) => {
            let kv = Arc::new(Persistence::new(dir.join(KV_DIR))?);
            let databases = Arc::new(Persistence::new(dir.join(DATABASES_DIR))?);
            (MemScopedStore::load(kv)?, MemDocumentStore::load(databases)?)
        }
        None => (
            MemScopedStore::persistent(Default::default(), None),
            MemDocumentStore::new(Default::default(), None),
        ),
    };

    let volatile = MemScopedStore::volatile();
    volatile.set_quota(config.quota_bytes);
    persistent.set_quota(config.quota_bytes);

    Ok(Satchel::assemble(volatile, persistent, documents))
}
