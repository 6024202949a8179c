/// Software Development Kit (SDK) for Satchel Store.
///
/// This module is the storage abstraction layer: JSON-safe scoped key-value stores,
/// live pool views and the transactional document store, plus environment-driven
/// construction of a complete set of backends.
pub mod database;
/// Environment-driven configuration and store initialization.
pub mod discovery;
pub mod kv;
pub mod pool;

pub use database::{CollectionSchema, Database, DatabaseSchema, DatabaseState, Transaction};
pub use discovery::{new, Config, Satchel};
pub use kv::{ScopedKv, Storage};
pub use pool::PoolCache;
