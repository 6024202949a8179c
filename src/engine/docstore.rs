use std::cmp::Ordering as KeyOrdering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::{
    Connection, DocumentStore, HostError, HostErrorKind, HostResult, HostTransaction, SchemaEditor,
    TransactionMode, UpgradeFn,
};
use crate::engine::Persistence;

/// On-disk and in-memory image of one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionImage {
    pub key_path: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub next_key: u64,
    /// Records in key order. Stored on disk as `[key, record]` pairs.
    #[serde(default, with = "record_pairs")]
    pub records: BTreeMap<RecordKey, Value>,
}

/// A valid record key, ordered the way IndexedDB orders keys:
/// numbers (numerically) before strings before arrays.
#[derive(Debug, Clone)]
pub enum RecordKey {
    Number(f64),
    String(String),
    Array(Vec<RecordKey>),
}

impl RecordKey {
    /// Parses a key. Numbers are compared by value, so `1` and `1.0` are the same key.
    pub fn from_value(key: &Value) -> HostResult<Self> {
        match key {
            Value::Number(n) => n
                .as_f64()
                // -0.0 and 0.0 are one key
                .map(|n| RecordKey::Number(n + 0.0))
                .ok_or_else(|| HostError::new(HostErrorKind::Data, format!("{} is not a valid key", key))),
            Value::String(s) => Ok(RecordKey::String(s.clone())),
            Value::Array(items) => items.iter().map(RecordKey::from_value).collect::<HostResult<Vec<_>>>().map(RecordKey::Array),
            _ => Err(HostError::new(HostErrorKind::Data, format!("{} is not a valid key", key))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Value::from(*n as i64),
            RecordKey::Number(n) => Value::from(*n),
            RecordKey::String(s) => Value::String(s.clone()),
            RecordKey::Array(items) => Value::Array(items.iter().map(RecordKey::to_value).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RecordKey::Number(_) => 0,
            RecordKey::String(_) => 1,
            RecordKey::Array(_) => 2,
        }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> KeyOrdering {
        match (self, other) {
            (RecordKey::Number(a), RecordKey::Number(b)) => a.total_cmp(b),
            (RecordKey::String(a), RecordKey::String(b)) => a.cmp(b),
            (RecordKey::Array(a), RecordKey::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<KeyOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == KeyOrdering::Equal
    }
}

impl Eq for RecordKey {}

mod record_pairs {
    use std::collections::BTreeMap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use super::RecordKey;

    pub fn serialize<S: Serializer>(records: &BTreeMap<RecordKey, Value>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(records.iter().map(|(key, record)| (key.to_value(), record)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<RecordKey, Value>, D::Error> {
        let pairs: Vec<(Value, Value)> = Vec::deserialize(deserializer)?;
        pairs
            .into_iter()
            .map(|(key, record)| {
                RecordKey::from_value(&key)
                    .map(|key| (key, record))
                    .map_err(|e| D::Error::custom(e.message))
            })
            .collect()
    }
}

/// On-disk and in-memory image of one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseImage {
    pub version: u32,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionImage>,
}

struct Inner {
    databases: RwLock<HashMap<String, DatabaseImage>>,
    connections: Mutex<HashMap<String, usize>>,
    faults: Mutex<VecDeque<HostError>>,
    persistence: Option<Arc<Persistence>>,
    save_lock: Mutex<()>,
    pending_tasks: AtomicUsize,
}

/// An in-memory [`DocumentStore`] with optional background persistence.
///
/// Each database is snapshotted to its own file after every committed write.
#[derive(Clone)]
pub struct MemDocumentStore {
    inner: Arc<Inner>,
}

impl MemDocumentStore {
    pub fn new(initial_data: HashMap<String, DatabaseImage>, persistence: Option<Arc<Persistence>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                databases: RwLock::new(initial_data),
                connections: Mutex::new(HashMap::new()),
                faults: Mutex::new(VecDeque::new()),
                persistence,
                save_lock: Mutex::new(()),
                pending_tasks: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a store from every database snapshot `persistence` holds.
    pub fn load(persistence: Arc<Persistence>) -> crate::Result<Self> {
        let initial_data = persistence.load_all()?;
        Ok(Self::new(initial_data, Some(persistence)))
    }

    /// Waits until every background snapshot write has finished.
    pub async fn wait(&self) {
        while self.inner.pending_tasks.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Makes the next transaction operation fail with `error`.
    ///
    /// An `Aborted` fault also aborts the transaction it hits.
    pub fn fail_next(&self, error: HostError) {
        self.inner.faults.lock().unwrap().push_back(error);
    }

    /// Returns a copy of a database's current image.
    pub fn snapshot(&self, name: &str) -> Option<DatabaseImage> {
        self.inner.databases.read().unwrap().get(name).cloned()
    }

    fn persist(&self, name: &str) {
        if self.inner.persistence.is_none() {
            return;
        }
        let inner = self.inner.clone();
        let name = name.to_string();
        inner.pending_tasks.fetch_add(1, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || {
            // Snapshot under the save lock so the last writer always saves the latest image.
            let _guard = inner.save_lock.lock().unwrap();
            let image = inner.databases.read().unwrap().get(&name).cloned();
            if let (Some(p), Some(image)) = (&inner.persistence, image) {
                if let Err(e) = p.save(&name, &image) {
                    log::error!("Failed to persist database {}: {}", name, e);
                }
            }
            inner.pending_tasks.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn release(&self, name: &str) {
        let mut connections = self.inner.connections.lock().unwrap();
        if let Some(count) = connections.get_mut(name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(name);
            }
        }
    }
}

struct UpgradeEditor<'a> {
    image: &'a mut DatabaseImage,
}

impl SchemaEditor for UpgradeEditor<'_> {
    fn collection_names(&self) -> Vec<String> {
        self.image.collections.keys().cloned().collect()
    }

    fn create_collection(&mut self, name: &str, key_path: &str, auto_increment: bool) -> HostResult<()> {
        if self.image.collections.contains_key(name) {
            return Err(HostError::new(HostErrorKind::Constraint, format!("collection {} already exists", name)));
        }
        if key_path.is_empty() {
            return Err(HostError::new(HostErrorKind::Data, "key path must not be empty"));
        }
        self.image.collections.insert(
            name.to_string(),
            CollectionImage {
                key_path: key_path.to_string(),
                auto_increment,
                ..Default::default()
            },
        );
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemDocumentStore {
    async fn open(&self, name: &str, version: u32, upgrade: &UpgradeFn) -> HostResult<Box<dyn Connection>> {
        if version == 0 {
            return Err(HostError::new(HostErrorKind::Data, "version must be at least 1"));
        }
        if self.inner.persistence.is_some() && !Persistence::is_valid_name(name) {
            return Err(HostError::new(
                HostErrorKind::Data,
                format!("database name {:?} cannot be stored as a snapshot", name),
            ));
        }

        let upgraded = {
            let mut databases = self.inner.databases.write().unwrap();
            let current = databases.get(name).map(|db| db.version).unwrap_or(0);

            if version < current {
                return Err(HostError::new(
                    HostErrorKind::Version,
                    format!("requested version {} is lower than existing version {}", version, current),
                ));
            }

            if version > current {
                let open_elsewhere = self.inner.connections.lock().unwrap().get(name).copied().unwrap_or(0);
                if open_elsewhere > 0 {
                    return Err(HostError::new(
                        HostErrorKind::Blocked,
                        format!("upgrade of {} blocked by {} open connection(s)", name, open_elsewhere),
                    ));
                }

                let mut image = databases.get(name).cloned().unwrap_or_default();
                upgrade(&mut UpgradeEditor { image: &mut image }, current)?;
                image.version = version;
                databases.insert(name.to_string(), image);
                log::debug!("Upgraded database {} from version {} to {}", name, current, version);
                true
            } else {
                false
            }
        };

        if upgraded {
            self.persist(name);
        }

        *self.inner.connections.lock().unwrap().entry(name.to_string()).or_default() += 1;

        Ok(Box::new(MemConnection {
            store: self.clone(),
            name: name.to_string(),
            version,
            closed: AtomicBool::new(false),
        }))
    }

    async fn database_names(&self) -> HostResult<Vec<String>> {
        let databases = self.inner.databases.read().unwrap();
        let mut names: Vec<String> = databases.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

pub struct MemConnection {
    store: MemDocumentStore,
    name: String,
    version: u32,
    closed: AtomicBool,
}

impl Connection for MemConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        let databases = self.store.inner.databases.read().unwrap();
        databases
            .get(&self.name)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(&self, collection: &str, mode: TransactionMode) -> HostResult<Box<dyn HostTransaction>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::new(HostErrorKind::InvalidState, "connection is closed"));
        }
        let exists = self.store.inner.databases.read().unwrap()
            .get(&self.name)
            .map_or(false, |db| db.collections.contains_key(collection));
        if !exists {
            return Err(HostError::new(
                HostErrorKind::NotFound,
                format!("collection {} does not exist in {}", collection, self.name),
            ));
        }
        Ok(Box::new(MemTransaction {
            store: self.store.clone(),
            database: self.name.clone(),
            collection: collection.to_string(),
            mode,
            aborted: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.release(&self.name);
        }
    }
}

impl Drop for MemConnection {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct MemTransaction {
    store: MemDocumentStore,
    database: String,
    collection: String,
    mode: TransactionMode,
    aborted: AtomicBool,
}

/// Resolves the key of `record`, generating one when the collection allows it.
fn record_key(collection: &mut CollectionImage, record: &mut Value) -> HostResult<Value> {
    let fields = record
        .as_object_mut()
        .ok_or_else(|| HostError::new(HostErrorKind::Data, "record must be a JSON object"))?;

    match fields.get(&collection.key_path) {
        Some(key) => {
            if let (true, Some(n)) = (collection.auto_increment, key.as_u64()) {
                collection.next_key = collection.next_key.max(n);
            }
            Ok(key.clone())
        }
        None if collection.auto_increment => {
            collection.next_key += 1;
            let key = Value::from(collection.next_key);
            fields.insert(collection.key_path.clone(), key.clone());
            Ok(key)
        }
        None => Err(HostError::new(
            HostErrorKind::Data,
            format!("record is missing key field {:?}", collection.key_path),
        )),
    }
}

impl MemTransaction {
    fn check(&self, write: bool) -> HostResult<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(HostError::new(HostErrorKind::Aborted, "transaction was aborted"));
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(HostError::new(HostErrorKind::ReadOnly, "transaction is read-only"));
        }
        if let Some(fault) = self.store.inner.faults.lock().unwrap().pop_front() {
            if fault.kind == HostErrorKind::Aborted {
                self.aborted.store(true, Ordering::SeqCst);
            }
            return Err(fault);
        }
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> HostResult<T>
    where
        F: FnOnce(&CollectionImage) -> HostResult<T>,
    {
        self.check(false)?;
        let databases = self.store.inner.databases.read().unwrap();
        let collection = databases
            .get(&self.database)
            .and_then(|db| db.collections.get(&self.collection))
            .ok_or_else(|| HostError::new(HostErrorKind::NotFound, format!("collection {} is gone", self.collection)))?;
        f(collection)
    }

    fn write<T, F>(&self, f: F) -> HostResult<T>
    where
        F: FnOnce(&mut CollectionImage) -> HostResult<T>,
    {
        self.check(true)?;
        let result = {
            let mut databases = self.store.inner.databases.write().unwrap();
            let collection = databases
                .get_mut(&self.database)
                .and_then(|db| db.collections.get_mut(&self.collection))
                .ok_or_else(|| HostError::new(HostErrorKind::NotFound, format!("collection {} is gone", self.collection)))?;
            // Work on a copy so a failed write leaves the collection untouched.
            let mut staged = collection.clone();
            let value = f(&mut staged)?;
            *collection = staged;
            value
        };
        self.store.persist(&self.database);
        Ok(result)
    }
}

#[async_trait]
impl HostTransaction for MemTransaction {
    async fn get(&self, key: &Value) -> HostResult<Option<Value>> {
        let id = RecordKey::from_value(key)?;
        self.read(|c| Ok(c.records.get(&id).cloned()))
    }

    async fn get_all(&self) -> HostResult<Vec<Value>> {
        self.read(|c| Ok(c.records.values().cloned().collect()))
    }

    async fn add(&self, mut record: Value) -> HostResult<Value> {
        self.write(|c| {
            let key = record_key(c, &mut record)?;
            let id = RecordKey::from_value(&key)?;
            if c.records.contains_key(&id) {
                return Err(HostError::new(HostErrorKind::Constraint, format!("key {} already exists", key)));
            }
            c.records.insert(id, record);
            Ok(key)
        })
    }

    async fn put(&self, mut record: Value) -> HostResult<Value> {
        self.write(|c| {
            let key = record_key(c, &mut record)?;
            let id = RecordKey::from_value(&key)?;
            c.records.insert(id, record);
            Ok(key)
        })
    }

    async fn delete(&self, key: &Value) -> HostResult<()> {
        let id = RecordKey::from_value(key)?;
        self.write(|c| {
            c.records.remove(&id);
            Ok(())
        })
    }

    async fn clear(&self) -> HostResult<()> {
        self.write(|c| {
            c.records.clear();
            Ok(())
        })
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn files_schema(editor: &mut dyn SchemaEditor, _old: u32) -> HostResult<()> {
        if !editor.collection_names().contains(&"files".to_string()) {
            editor.create_collection("files", "id", false)?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_open_creates_and_upgrades_once() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let upgrade = move |editor: &mut dyn SchemaEditor, old: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            files_schema(editor, old)
        };

        let conn = store.open("app", 1, &upgrade).await.unwrap();
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.collection_names(), vec!["files".to_string()]);
        conn.close();

        let conn = store.open("app", 1, &upgrade).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(conn);

        assert_eq!(store.database_names().await.unwrap(), vec!["app".to_string()]);
    }

    #[tokio::test]
    async fn test_open_lower_version_fails() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        drop(store.open("app", 2, &files_schema).await.unwrap());
        let err = store.open("app", 1, &files_schema).await.err().unwrap();
        assert_eq!(err.kind, HostErrorKind::Version);
    }

    #[tokio::test]
    async fn test_upgrade_blocked_by_open_connection() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let first = store.open("app", 1, &files_schema).await.unwrap();

        let err = store.open("app", 2, &files_schema).await.err().unwrap();
        assert_eq!(err.kind, HostErrorKind::Blocked);
        assert_eq!(store.snapshot("app").unwrap().version, 1);

        first.close();
        assert_eq!(store.open("app", 2, &files_schema).await.unwrap().version(), 2);
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_database_untouched() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let failing = |editor: &mut dyn SchemaEditor, _old: u32| -> HostResult<()> {
            editor.create_collection("files", "id", false)?;
            Err(HostError::new(HostErrorKind::Unknown, "boom"))
        };
        assert!(store.open("app", 1, &failing).await.is_err());
        assert!(store.snapshot("app").is_none());
    }

    #[tokio::test]
    async fn test_add_conflict_and_put_overwrite() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();

        assert_eq!(tx.add(json!({"id": 1, "v": "a"})).await.unwrap(), json!(1));
        let err = tx.add(json!({"id": 1, "v": "b"})).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Constraint);

        tx.put(json!({"id": 1, "v": "c"})).await.unwrap();
        assert_eq!(tx.get(&json!(1)).await.unwrap(), Some(json!({"id": 1, "v": "c"})));
        assert_eq!(tx.get(&json!(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_auto_increment_keys() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let upgrade = |editor: &mut dyn SchemaEditor, _old: u32| editor.create_collection("log", "seq", true);
        let conn = store.open("app", 1, &upgrade).await.unwrap();
        let tx = conn.transaction("log", TransactionMode::ReadWrite).unwrap();

        assert_eq!(tx.add(json!({"msg": "a"})).await.unwrap(), json!(1));
        assert_eq!(tx.put(json!({"seq": 10, "msg": "b"})).await.unwrap(), json!(10));
        assert_eq!(tx.add(json!({"msg": "c"})).await.unwrap(), json!(11));
        assert_eq!(tx.get(&json!(11)).await.unwrap(), Some(json!({"seq": 11, "msg": "c"})));
    }

    #[tokio::test]
    async fn test_missing_key_and_bad_key() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();

        assert_eq!(tx.add(json!({"name": "x"})).await.unwrap_err().kind, HostErrorKind::Data);
        assert_eq!(tx.put(json!("scalar")).await.unwrap_err().kind, HostErrorKind::Data);
        assert_eq!(tx.get(&json!({"a": 1})).await.unwrap_err().kind, HostErrorKind::Data);
    }

    #[tokio::test]
    async fn test_read_only_and_abort() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();

        let tx = conn.transaction("files", TransactionMode::ReadOnly).unwrap();
        assert_eq!(tx.clear().await.unwrap_err().kind, HostErrorKind::ReadOnly);

        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();
        tx.abort();
        assert_eq!(tx.get(&json!("a")).await.unwrap_err().kind, HostErrorKind::Aborted);

        assert_eq!(conn.transaction("nope", TransactionMode::ReadWrite).err().unwrap().kind, HostErrorKind::NotFound);
        conn.close();
        assert_eq!(conn.transaction("files", TransactionMode::ReadWrite).err().unwrap().kind, HostErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_injected_fault_hits_next_operation_only() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();

        store.fail_next(HostError::new(HostErrorKind::Unknown, "disk"));
        assert_eq!(tx.put(json!({"id": "a"})).await.unwrap_err().message, "disk");
        assert_eq!(tx.get(&json!("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let persistence = Arc::new(Persistence::new(dir.path()).unwrap());

        let store = MemDocumentStore::load(persistence.clone()).unwrap();
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();
        tx.put(json!({"id": "a", "size": 10})).await.unwrap();
        store.wait().await;
        assert!(dir.path().join("app.json").exists());

        let reloaded = MemDocumentStore::load(persistence).unwrap();
        let image = reloaded.snapshot("app").unwrap();
        assert_eq!(image.version, 1);
        assert_eq!(image.collections["files"].records[&RecordKey::String("a".to_string())], json!({"id": "a", "size": 10}));
    }

    #[tokio::test]
    async fn test_get_all_in_key_order() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();

        for id in [json!("b"), json!(10), json!([1]), json!(2), json!("a"), json!(1)] {
            tx.put(json!({ "id": id })).await.unwrap();
        }
        let ids: Vec<Value> = tx.get_all().await.unwrap().into_iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(10), json!("a"), json!("b"), json!([1])]);
    }

    #[tokio::test]
    async fn test_numeric_keys_compare_by_value() {
        let store = MemDocumentStore::new(HashMap::new(), None);
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();

        tx.put(json!({"id": 1, "v": "int"})).await.unwrap();
        assert_eq!(tx.get(&json!(1.0)).await.unwrap(), Some(json!({"id": 1, "v": "int"})));
        assert_eq!(tx.add(json!({"id": 1.0})).await.unwrap_err().kind, HostErrorKind::Constraint);
    }

    #[tokio::test]
    async fn test_unstorable_name_fails_open_with_persistence() {
        let dir = tempdir().unwrap();
        let persistence = Arc::new(Persistence::new(dir.path()).unwrap());
        let store = MemDocumentStore::load(persistence).unwrap();

        let err = store.open("team/app", 1, &files_schema).await.err().unwrap();
        assert_eq!(err.kind, HostErrorKind::Data);
        assert!(store.database_names().await.unwrap().is_empty());

        let in_memory = MemDocumentStore::new(HashMap::new(), None);
        assert!(in_memory.open("team/app", 1, &files_schema).await.is_ok());
    }

    #[tokio::test]
    async fn test_key_order_survives_reload() {
        let dir = tempdir().unwrap();
        let persistence = Arc::new(Persistence::new(dir.path()).unwrap());

        let store = MemDocumentStore::load(persistence.clone()).unwrap();
        let conn = store.open("app", 1, &files_schema).await.unwrap();
        let tx = conn.transaction("files", TransactionMode::ReadWrite).unwrap();
        for id in [10, 2, 1] {
            tx.put(json!({ "id": id })).await.unwrap();
        }
        store.wait().await;

        let image = MemDocumentStore::load(persistence).unwrap().snapshot("app").unwrap();
        let keys: Vec<Value> = image.collections["files"].records.keys().map(RecordKey::to_value).collect();
        assert_eq!(keys, vec![json!(1), json!(2), json!(10)]);
    }
}
