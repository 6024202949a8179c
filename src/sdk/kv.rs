use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use crate::{Result, Scope, ScopedStore};
use crate::engine::codec;
use crate::sdk::PoolCache;

/// A JSON-safe view of one host [`ScopedStore`].
///
/// Reads decode through the codec and never fail: absent or corrupted values come back
/// as `None`. Writes overwrite unconditionally and host faults (quota, security) are
/// returned as [`Error::Host`](crate::Error::Host) without translation or retry.
#[derive(Clone)]
pub struct ScopedKv {
    store: Arc<dyn ScopedStore>,
}

impl ScopedKv {
    pub fn new(store: Arc<dyn ScopedStore>) -> Self {
        Self { store }
    }

    pub fn scope(&self) -> Scope {
        self.store.scope()
    }

    /// The raw text under `key`, before decoding.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.store.get_item(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        codec::decode(self.store.get_item(key).as_deref())
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.store.set_item(key, &codec::encode(value))?;
        Ok(())
    }

    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        codec::decode_typed(self.store.get_item(key).as_deref())
    }

    pub fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set_item(key, &codec::encode_typed(value)?)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove_item(key)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.store.keys();
        keys.sort();
        keys
    }

    /// Returns a live view of the pool stored under `name`, creating it empty if absent.
    pub fn pool(&self, name: &str) -> Result<PoolCache> {
        PoolCache::open(self.clone(), name)
    }
}

/// The two synchronous stores of a browsing context, addressed by [`Scope`].
#[derive(Clone)]
pub struct Storage {
    volatile: ScopedKv,
    persistent: ScopedKv,
}

impl Storage {
    pub fn new(volatile: Arc<dyn ScopedStore>, persistent: Arc<dyn ScopedStore>) -> Self {
        Self {
            volatile: ScopedKv::new(volatile),
            persistent: ScopedKv::new(persistent),
        }
    }

    pub fn volatile(&self) -> &ScopedKv {
        &self.volatile
    }

    pub fn persistent(&self) -> &ScopedKv {
        &self.persistent
    }

    pub fn scoped(&self, scope: Scope) -> &ScopedKv {
        match scope {
            Scope::Volatile => &self.volatile,
            Scope::Persistent => &self.persistent,
        }
    }

    pub fn get(&self, scope: Scope, key: &str) -> Option<Value> {
        self.scoped(scope).get(key)
    }

    pub fn set(&self, scope: Scope, key: &str, value: &Value) -> Result<()> {
        self.scoped(scope).set(key, value)
    }

    pub fn pool(&self, scope: Scope, name: &str) -> Result<PoolCache> {
        self.scoped(scope).pool(name)
    }
}
