pub mod codec;
pub mod docstore;
pub mod memstore;
pub mod persistence;

pub use docstore::MemDocumentStore;
pub use memstore::{MemScopedStore, StorageEvent, StorageEvents};
pub use persistence::Persistence;
