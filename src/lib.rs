//! Satchel Store is a client-side persistence layer.
//!
//! It unifies three storage facilities behind a few access patterns:
//! two synchronous, JSON-safe key-value stores (one `volatile`, scoped to a
//! browsing context, one `persistent`, scoped to the origin), a live "pool"
//! view over a bag of fields kept as one JSON document, and an asynchronous,
//! schema-versioned transactional document store.
//!
//! The host facilities are modelled as injectable traits so the core can run
//! against the in-memory backends in [`engine`] or any other implementation.
//!
//! ## Core Components
//! - [`engine`]: Host-side backends (in-memory with optional persistence) and the JSON codec.
//! - [`sdk`]: The storage abstraction layer callers use: scoped KV, pools and databases.

pub mod engine;
pub mod sdk;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The category of a fault reported by a host storage facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostErrorKind {
    /// The write would exceed the storage quota.
    QuotaExceeded,
    /// Storage is unavailable (privacy mode, denied access).
    Security,
    /// A uniqueness constraint was violated, e.g. a duplicate key on insert.
    Constraint,
    /// The transaction was aborted before the operation completed.
    Aborted,
    /// The named database or collection does not exist.
    NotFound,
    /// The requested schema version is lower than the stored one.
    Version,
    /// The open was blocked by another open connection.
    Blocked,
    /// The record or key was not acceptable (missing key field, bad key).
    Data,
    /// A write was attempted in a read-only transaction.
    ReadOnly,
    /// The handle is closed or no longer usable.
    InvalidState,
    /// Any other fault, including I/O failures of the backing medium.
    Unknown,
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostErrorKind::QuotaExceeded => "QuotaExceededError",
            HostErrorKind::Security => "SecurityError",
            HostErrorKind::Constraint => "ConstraintError",
            HostErrorKind::Aborted => "AbortError",
            HostErrorKind::NotFound => "NotFoundError",
            HostErrorKind::Version => "VersionError",
            HostErrorKind::Blocked => "BlockedError",
            HostErrorKind::Data => "DataError",
            HostErrorKind::ReadOnly => "ReadOnlyError",
            HostErrorKind::InvalidState => "InvalidStateError",
            HostErrorKind::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

/// A fault as reported by the host environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Result type returned by host-facing traits.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// A single-record operation on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Add,
    Put,
    Delete,
    Clear,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Get => "get",
            Operation::Add => "add",
            Operation::Put => "put",
            Operation::Delete => "delete",
            Operation::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Errors returned by Satchel Store.
#[derive(Error, Debug)]
pub enum Error {
    /// The database could not be opened or upgraded.
    #[error("open error: {0}")]
    Open(HostError),
    /// The transaction could not be started or aborted before the operation completed.
    #[error("transaction error: {0}")]
    Transaction(HostError),
    /// A record operation failed inside an otherwise live transaction.
    #[error("{op} error: {cause}")]
    Operation { op: Operation, cause: HostError },
    /// A host fault from a synchronous store, passed through untranslated.
    #[error(transparent)]
    Host(#[from] HostError),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Open,
    Transaction,
    Get,
    Add,
    Put,
    Delete,
    Clear,
    Host,
    Io,
    Serialization,
    Internal,
}

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open(_) => ErrorKind::Open,
            Error::Transaction(_) => ErrorKind::Transaction,
            Error::Operation { op, .. } => match op {
                Operation::Get => ErrorKind::Get,
                Operation::Add => ErrorKind::Add,
                Operation::Put => ErrorKind::Put,
                Operation::Delete => ErrorKind::Delete,
                Operation::Clear => ErrorKind::Clear,
            },
            Error::Host(_) => ErrorKind::Host,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the host-reported cause, when there is one.
    pub fn cause(&self) -> Option<&HostError> {
        match self {
            Error::Open(cause) | Error::Transaction(cause) | Error::Host(cause) => Some(cause),
            Error::Operation { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// A specialized Result type for Satchel Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The durability and visibility boundary of a key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Lives as long as the browsing context.
    Volatile,
    /// Shared by the whole origin and survives reloads.
    Persistent,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Volatile => f.write_str("volatile"),
            Scope::Persistent => f.write_str("persistent"),
        }
    }
}

/// A synchronous string-to-string store provided by the host.
///
/// Writes are visible to readers in the same scope as soon as the call returns.
pub trait ScopedStore: Send + Sync {
    /// The scope this store belongs to.
    fn scope(&self) -> Scope;
    /// Returns the raw text stored under `key`.
    fn get_item(&self, key: &str) -> Option<String>;
    /// Writes `value` under `key`, replacing whatever was there.
    fn set_item(&self, key: &str, value: &str) -> HostResult<()>;
    /// Removes `key`. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> HostResult<()>;
    /// Removes every key in the store.
    fn clear(&self) -> HostResult<()>;
    /// Lists every key currently stored.
    fn keys(&self) -> Vec<String>;
}

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Schema changes available while a database is being upgraded.
pub trait SchemaEditor {
    /// Names of the collections that already exist.
    fn collection_names(&self) -> Vec<String>;
    /// Creates a collection keyed by `key_path`.
    fn create_collection(&mut self, name: &str, key_path: &str, auto_increment: bool) -> HostResult<()>;
}

/// Called once per version increase, with the version the database had before the open
/// (`0` when the database did not exist).
pub type UpgradeFn = dyn Fn(&mut dyn SchemaEditor, u32) -> HostResult<()> + Send + Sync;

/// An asynchronous, versioned document store provided by the host.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens `name` at `version`, creating it if needed.
    ///
    /// When the database is absent or older than `version`, `upgrade` runs exactly once
    /// before the open resolves. An upgrade that fails leaves the database untouched.
    async fn open(&self, name: &str, version: u32, upgrade: &UpgradeFn) -> HostResult<Box<dyn Connection>>;
    /// Lists the names of existing databases.
    async fn database_names(&self) -> HostResult<Vec<String>>;
}

/// An open connection to one database.
pub trait Connection: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u32;
    fn collection_names(&self) -> Vec<String>;
    /// Starts a transaction over exactly one collection.
    fn transaction(&self, collection: &str, mode: TransactionMode) -> HostResult<Box<dyn HostTransaction>>;
    /// Closes the connection. Further transactions fail with `InvalidState`.
    fn close(&self);
}

/// A host transaction scoped to one collection.
#[async_trait]
pub trait HostTransaction: Send + Sync {
    async fn get(&self, key: &Value) -> HostResult<Option<Value>>;
    async fn get_all(&self) -> HostResult<Vec<Value>>;
    /// Inserts `record`, failing with `Constraint` when its key already exists.
    async fn add(&self, record: Value) -> HostResult<Value>;
    /// Inserts or replaces `record`.
    async fn put(&self, record: Value) -> HostResult<Value>;
    async fn delete(&self, key: &Value) -> HostResult<()>;
    async fn clear(&self) -> HostResult<()>;
    /// Aborts the transaction. Later operations fail with `Aborted`.
    fn abort(&self);
}
