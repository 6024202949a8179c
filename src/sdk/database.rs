use std::sync::{Arc, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::{
    Connection, DocumentStore, Error, HostError, HostErrorKind, HostTransaction, Operation, Result,
    SchemaEditor, TransactionMode,
};

/// Key field used when a collection does not declare one.
pub const DEFAULT_KEY_PATH: &str = "id";

fn default_key_path() -> String {
    DEFAULT_KEY_PATH.to_string()
}

/// A named collection and the field its records are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Generate integer keys for records that lack the key field.
    #[serde(default)]
    pub auto_increment: bool,
}

impl CollectionSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: default_key_path(),
            auto_increment: false,
        }
    }

    pub fn key_path(mut self, key_path: &str) -> Self {
        self.key_path = key_path.to_string();
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// The declared shape of a database: its name, version and collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
}

impl DatabaseSchema {
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            collections: Vec::new(),
        }
    }

    /// Declares a collection keyed by [`DEFAULT_KEY_PATH`].
    pub fn collection(self, name: &str) -> Self {
        self.with_collection(CollectionSchema::new(name))
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.push(collection);
        self
    }
}

/// Creates every declared collection that is missing. Existing collections are never
/// dropped or renamed.
fn apply_schema(collections: &[CollectionSchema], editor: &mut dyn SchemaEditor, old_version: u32) -> crate::HostResult<()> {
    let existing = editor.collection_names();
    for collection in collections {
        if existing.contains(&collection.name) {
            continue;
        }
        log::debug!(
            "Creating collection {} (key {:?}) while upgrading from version {}",
            collection.name, collection.key_path, old_version
        );
        editor.create_collection(&collection.name, &collection.key_path, collection.auto_increment)?;
    }
    Ok(())
}

/// Lifecycle of a [`Database`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseState {
    Unopened,
    Opening,
    Ready,
    /// Terminal. The cause is replayed on every later open.
    Failed(HostError),
}

enum State {
    Unopened,
    Opening,
    Ready(Arc<dyn Connection>),
    Failed(HostError),
}

/// A handle on one versioned database.
///
/// `unopened -> opening -> ready`, or `unopened -> opening -> failed` when the host
/// refuses the open. A failed handle stays failed.
pub struct Database {
    store: Arc<dyn DocumentStore>,
    schema: DatabaseSchema,
    state: Mutex<State>,
    opening: tokio::sync::Mutex<()>,
}

impl Database {
    pub fn new(store: Arc<dyn DocumentStore>, schema: DatabaseSchema) -> Self {
        Self {
            store,
            schema,
            state: Mutex::new(State::Unopened),
            opening: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a handle and opens it.
    pub async fn open_with(store: Arc<dyn DocumentStore>, schema: DatabaseSchema) -> Result<Self> {
        let db = Self::new(store, schema);
        db.open().await?;
        Ok(db)
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn state(&self) -> DatabaseState {
        match &*self.state.lock().unwrap() {
            State::Unopened => DatabaseState::Unopened,
            State::Opening => DatabaseState::Opening,
            State::Ready(_) => DatabaseState::Ready,
            State::Failed(cause) => DatabaseState::Failed(cause.clone()),
        }
    }

    /// Opens the database, running the schema upgrade if the stored version is older.
    ///
    /// Opening a ready handle is a no-op.
    pub async fn open(&self) -> Result<()> {
        let _opening = self.opening.lock().await;

        {
            let mut state = self.state.lock().unwrap();
            match *state {
                State::Ready(_) => return Ok(()),
                State::Failed(ref cause) => return Err(Error::Open(cause.clone())),
                State::Unopened | State::Opening => {}
            }
            *state = State::Opening;
        }

        let collections = self.schema.collections.clone();
        let upgrade = move |editor: &mut dyn SchemaEditor, old_version: u32| apply_schema(&collections, editor, old_version);

        match self.store.open(&self.schema.name, self.schema.version, &upgrade).await {
            Ok(connection) => {
                log::debug!("Opened database {} at version {}", self.schema.name, connection.version());
                *self.state.lock().unwrap() = State::Ready(Arc::from(connection));
                Ok(())
            }
            Err(cause) => {
                log::warn!("Failed to open database {}: {}", self.schema.name, cause);
                *self.state.lock().unwrap() = State::Failed(cause.clone());
                Err(Error::Open(cause))
            }
        }
    }

    /// Closes the connection and returns the handle to `unopened`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if let State::Ready(connection) = &*state {
            connection.close();
            *state = State::Unopened;
        }
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        match &*self.state.lock().unwrap() {
            State::Ready(connection) => Ok(connection.clone()),
            State::Failed(cause) => Err(Error::Transaction(cause.clone())),
            State::Unopened | State::Opening => Err(Error::Transaction(HostError::new(
                HostErrorKind::InvalidState,
                format!("database {} is not open", self.schema.name),
            ))),
        }
    }

    /// Version of the open database.
    pub fn version(&self) -> Result<u32> {
        Ok(self.connection()?.version())
    }

    /// Collections of the open database.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.connection()?.collection_names())
    }

    /// Starts a read-write transaction over `collection`, good for one operation.
    pub fn transaction(&self, collection: &str) -> Result<Transaction> {
        self.transaction_with_mode(collection, TransactionMode::ReadWrite)
    }

    pub fn transaction_with_mode(&self, collection: &str, mode: TransactionMode) -> Result<Transaction> {
        let inner = self.connection()?.transaction(collection, mode).map_err(Error::Transaction)?;
        Ok(Transaction { inner })
    }
}

/// A transaction over one collection. Each operation consumes it.
///
/// Faults map to the failing operation's error, except an abort, which surfaces as
/// [`Error::Transaction`]. Nothing is retried.
pub struct Transaction {
    inner: Box<dyn HostTransaction>,
}

fn fault(op: Operation, cause: HostError) -> Error {
    if cause.kind == HostErrorKind::Aborted {
        Error::Transaction(cause)
    } else {
        Error::Operation { op, cause }
    }
}

impl Transaction {
    /// The record stored at `key`, or `None`.
    pub async fn get(self, key: impl Into<Value>) -> Result<Option<Value>> {
        self.inner.get(&key.into()).await.map_err(|e| fault(Operation::Get, e))
    }

    /// Every record in the collection, in key order.
    pub async fn get_all(self) -> Result<Vec<Value>> {
        self.inner.get_all().await.map_err(|e| fault(Operation::Get, e))
    }

    /// Inserts `record` and returns its key.
    ///
    /// Inserting a key that already exists is not an error: the stored record is left
    /// as it was and `None` is returned.
    pub async fn add(self, record: Value) -> Result<Option<Value>> {
        match self.inner.add(record).await {
            Ok(key) => Ok(Some(key)),
            Err(cause) if cause.kind == HostErrorKind::Constraint => {
                log::debug!("Ignoring duplicate insert: {}", cause);
                Ok(None)
            }
            Err(cause) => Err(fault(Operation::Add, cause)),
        }
    }

    /// Inserts or replaces `record` and returns its key.
    pub async fn put(self, record: Value) -> Result<Value> {
        self.inner.put(record).await.map_err(|e| fault(Operation::Put, e))
    }

    pub async fn delete(self, key: impl Into<Value>) -> Result<()> {
        self.inner.delete(&key.into()).await.map_err(|e| fault(Operation::Delete, e))
    }

    pub async fn clear(self) -> Result<()> {
        self.inner.clear().await.map_err(|e| fault(Operation::Clear, e))
    }

    /// Abandons the transaction without running an operation.
    pub fn abort(self) {
        self.inner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemDocumentStore;
    use crate::ErrorKind;
    use serde_json::json;
    use std::collections::HashMap;

    fn store() -> (MemDocumentStore, Arc<dyn DocumentStore>) {
        let mem = MemDocumentStore::new(HashMap::new(), None);
        (mem.clone(), Arc::new(mem))
    }

    fn app_schema(version: u32) -> DatabaseSchema {
        DatabaseSchema::new("app", version).collection("files")
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (_, store) = store();
        let db = Database::new(store, app_schema(1));
        assert_eq!(db.state(), DatabaseState::Unopened);
        assert_eq!(db.transaction("files").err().unwrap().kind(), ErrorKind::Transaction);

        db.open().await.unwrap();
        assert_eq!(db.state(), DatabaseState::Ready);
        assert_eq!(db.version().unwrap(), 1);

        db.close();
        assert_eq!(db.state(), DatabaseState::Unopened);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let (mem, store) = store();
        let first = Database::open_with(store.clone(), app_schema(1)).await.unwrap();
        first.close();
        let second = Database::open_with(store, app_schema(1)).await.unwrap();

        assert_eq!(second.collection_names().unwrap(), vec!["files".to_string()]);
        assert_eq!(second.version().unwrap(), 1);
        assert_eq!(mem.snapshot("app").unwrap().collections.len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_is_additive() {
        let (mem, store) = store();
        let v1 = Database::open_with(store.clone(), app_schema(1)).await.unwrap();
        v1.transaction("files").unwrap().put(json!({"id": "a"})).await.unwrap();
        v1.close();

        let schema = app_schema(2).with_collection(CollectionSchema::new("thumbs").key_path("path"));
        let v2 = Database::open_with(store, schema).await.unwrap();
        assert_eq!(v2.collection_names().unwrap(), vec!["files".to_string(), "thumbs".to_string()]);
        assert_eq!(mem.snapshot("app").unwrap().collections["thumbs"].key_path, "path");
        assert_eq!(v2.transaction("files").unwrap().get("a").await.unwrap(), Some(json!({"id": "a"})));
    }

    #[tokio::test]
    async fn test_blocked_open_is_terminal() {
        let (_, store) = store();
        let holder = Database::open_with(store.clone(), app_schema(1)).await.unwrap();

        let db = Database::new(store, app_schema(2));
        let err = db.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
        assert_eq!(err.cause().unwrap().kind, HostErrorKind::Blocked);
        assert!(matches!(db.state(), DatabaseState::Failed(_)));

        holder.close();
        assert_eq!(db.open().await.unwrap_err().kind(), ErrorKind::Open);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_put_overwrites() {
        let (_, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();

        assert_eq!(db.transaction("files").unwrap().add(json!({"id": 1, "v": "first"})).await.unwrap(), Some(json!(1)));
        assert_eq!(db.transaction("files").unwrap().add(json!({"id": 1, "v": "second"})).await.unwrap(), None);
        assert_eq!(db.transaction("files").unwrap().get(1).await.unwrap(), Some(json!({"id": 1, "v": "first"})));

        db.transaction("files").unwrap().put(json!({"id": 1, "v": "a"})).await.unwrap();
        assert_eq!(db.transaction("files").unwrap().put(json!({"id": 1, "v": "b"})).await.unwrap(), json!(1));
        assert_eq!(db.transaction("files").unwrap().get(1).await.unwrap(), Some(json!({"id": 1, "v": "b"})));
    }

    #[tokio::test]
    async fn test_get_all_orders_numeric_keys_by_value() {
        let (_, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();
        for id in [2, 10, 1] {
            db.transaction("files").unwrap().put(json!({"id": id})).await.unwrap();
        }
        let all = db.transaction("files").unwrap().get_all().await.unwrap();
        assert_eq!(all, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 10})]);
        assert_eq!(db.transaction("files").unwrap().get(2.0).await.unwrap(), Some(json!({"id": 2})));
    }

    #[tokio::test]
    async fn test_unstorable_name_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(crate::engine::Persistence::new(dir.path()).unwrap());
        let store: Arc<dyn DocumentStore> = Arc::new(MemDocumentStore::load(persistence).unwrap());

        let db = Database::new(store, DatabaseSchema::new("team/app", 1).collection("files"));
        let err = db.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
        assert_eq!(err.cause().unwrap().kind, HostErrorKind::Data);
    }

    #[tokio::test]
    async fn test_get_missing_resolves_none() {
        let (_, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();
        assert_eq!(db.transaction("files").unwrap().get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_operation_errors_are_classified() {
        let (mem, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();

        let cases = [
            (Operation::Get, ErrorKind::Get),
            (Operation::Add, ErrorKind::Add),
            (Operation::Put, ErrorKind::Put),
            (Operation::Delete, ErrorKind::Delete),
            (Operation::Clear, ErrorKind::Clear),
        ];
        for (op, expected) in cases {
            mem.fail_next(HostError::new(HostErrorKind::Unknown, "disk failure"));
            let tx = db.transaction("files").unwrap();
            let err = match op {
                Operation::Get => tx.get("a").await.unwrap_err(),
                Operation::Add => tx.add(json!({"id": "a"})).await.unwrap_err(),
                Operation::Put => tx.put(json!({"id": "a"})).await.unwrap_err(),
                Operation::Delete => tx.delete("a").await.unwrap_err(),
                Operation::Clear => tx.clear().await.unwrap_err(),
            };
            assert_eq!(err.kind(), expected);
            assert_eq!(err.to_string(), format!("{} error: UnknownError: disk failure", op));
        }
    }

    #[tokio::test]
    async fn test_add_without_key_is_add_error() {
        let (_, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();
        let err = db.transaction("files").unwrap().add(json!({"name": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Add);
        assert_eq!(err.cause().unwrap().kind, HostErrorKind::Data);
    }

    #[tokio::test]
    async fn test_abort_surfaces_transaction_error() {
        let (mem, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();

        mem.fail_next(HostError::new(HostErrorKind::Aborted, "aborted by host"));
        let err = db.transaction("files").unwrap().put(json!({"id": "a"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transaction);

        assert_eq!(db.transaction("missing").err().unwrap().kind(), ErrorKind::Transaction);
        db.transaction("files").unwrap().abort();
        assert_eq!(db.transaction("files").unwrap().get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_only_transaction() {
        let (_, store) = store();
        let db = Database::open_with(store, app_schema(1)).await.unwrap();
        let err = db
            .transaction_with_mode("files", TransactionMode::ReadOnly)
            .unwrap()
            .clear()
            .await
            .unwrap_err();
        assert_eq!(err.cause().unwrap().kind, HostErrorKind::ReadOnly);
    }

    #[test]
    fn test_schema_from_json_defaults_key_path() {
        let schema: DatabaseSchema = serde_json::from_value(json!({
            "name": "app",
            "version": 3,
            "collections": [{"name": "files"}, {"name": "log", "key_path": "seq", "auto_increment": true}]
        }))
        .unwrap();
        assert_eq!(schema.collections[0], CollectionSchema::new("files"));
        assert_eq!(schema.collections[1], CollectionSchema::new("log").key_path("seq").auto_increment());
    }
}
