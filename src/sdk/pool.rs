use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use crate::{Result, Scope};
use crate::sdk::ScopedKv;

/// A live view over one pool: a bag of fields stored as a single JSON object
/// under the pool's name in a [`ScopedKv`].
///
/// Nothing is cached. Every read fetches and decodes the stored document, and every
/// write re-reads it, replaces one field and stores the whole document again.
///
/// # Concurrent writers
///
/// The read-modify-write is not compare-and-swap protected. Two writers interleaving
/// on the same pool (two contexts, or two views in one context) race, and the later
/// whole-document write wins: a field set by the earlier writer in between can be lost.
pub struct PoolCache {
    kv: ScopedKv,
    name: String,
}

impl PoolCache {
    /// Binds a view to `name`, storing an empty document if the pool does not exist yet.
    pub fn open(kv: ScopedKv, name: &str) -> Result<Self> {
        if kv.get_raw(name).is_none() {
            log::debug!("Initializing empty pool {} in {} storage", name, kv.scope());
            kv.set(name, &Value::Object(Map::new()))?;
        }
        Ok(Self {
            kv,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.kv.scope()
    }

    /// The stored document. A missing, corrupted or non-object document reads as empty.
    pub fn entries(&self) -> Map<String, Value> {
        match self.kv.get(&self.name) {
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                log::warn!("Pool {} holds a non-object document ({}), reading as empty", self.name, kind_of(&other));
                Map::new()
            }
            None => Map::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.entries().remove(field)
    }

    pub fn get_typed<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.get(field).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries().contains_key(field)
    }

    /// Field names of the document as stored right now.
    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        self.update(|fields| {
            fields.insert(field.to_string(), value);
        })
    }

    pub fn set_typed<T: Serialize>(&self, field: &str, value: &T) -> Result<()> {
        self.set(field, serde_json::to_value(value)?)
    }

    pub fn remove(&self, field: &str) -> Result<()> {
        self.update(|fields| {
            fields.remove(field);
        })
    }

    /// Empties the pool, keeping its document in place.
    pub fn clear(&self) -> Result<()> {
        self.update(|fields| fields.clear())
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut fields = self.entries();
        mutate(&mut fields);
        self.kv.set(&self.name, &Value::Object(fields))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
