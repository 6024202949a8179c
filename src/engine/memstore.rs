use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use crate::{HostError, HostErrorKind, HostResult, Scope, ScopedStore};
use crate::engine::Persistence;

/// Snapshot name of the persistent area on disk.
pub const PERSISTENT_SNAPSHOT: &str = "persistent";

const EVENT_CAPACITY: usize = 256;

type AreaData = HashMap<String, String>;

/// A change made to a persistent area by another browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key written or removed; `None` when the whole area was cleared.
    pub key: Option<String>,
    /// The new raw (undecoded) value; `None` on removal or clear.
    pub new_value: Option<String>,
}

#[derive(Debug, Clone)]
struct Envelope {
    source: u64,
    event: StorageEvent,
}

struct Area {
    data: RwLock<AreaData>,
    persistence: Option<Arc<Persistence>>,
    quota_bytes: AtomicUsize,
    events: broadcast::Sender<Envelope>,
    next_context: AtomicU64,
}

impl Area {
    fn new(initial_data: AreaData, persistence: Option<Arc<Persistence>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            data: RwLock::new(initial_data),
            persistence,
            quota_bytes: AtomicUsize::new(usize::MAX),
            events,
            next_context: AtomicU64::new(0),
        }
    }

    fn usage(data: &AreaData) -> usize {
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn persist(&self, data: &AreaData) -> HostResult<()> {
        if let Some(p) = &self.persistence {
            p.save(PERSISTENT_SNAPSHOT, data)
                .map_err(|e| HostError::new(HostErrorKind::Unknown, e.to_string()))?;
        }
        Ok(())
    }
}

/// An in-memory [`ScopedStore`].
///
/// A persistent store shares its area with every context opened from it, writes
/// through to [`Persistence`] when configured, and notifies the other contexts of
/// each change. A volatile store belongs to exactly one context.
pub struct MemScopedStore {
    scope: Scope,
    area: Arc<Area>,
    context: u64,
}

impl MemScopedStore {
    /// Creates a volatile store for a fresh browsing context.
    pub fn volatile() -> Self {
        Self::with_area(Scope::Volatile, Arc::new(Area::new(HashMap::new(), None)))
    }

    /// Creates the persistent area of an origin and returns its first context.
    pub fn persistent(initial_data: AreaData, persistence: Option<Arc<Persistence>>) -> Self {
        Self::with_area(Scope::Persistent, Arc::new(Area::new(initial_data, persistence)))
    }

    /// Creates a persistent store backed by `persistence`, loading any existing snapshot.
    pub fn load(persistence: Arc<Persistence>) -> crate::Result<Self> {
        let initial_data = persistence.load(PERSISTENT_SNAPSHOT)?.unwrap_or_default();
        Ok(Self::persistent(initial_data, Some(persistence)))
    }

    fn with_area(scope: Scope, area: Arc<Area>) -> Self {
        let context = area.next_context.fetch_add(1, Ordering::SeqCst);
        Self { scope, area, context }
    }

    /// Opens the same kind of store for another browsing context of the same origin.
    ///
    /// Persistent stores share their area; volatile stores start empty.
    pub fn open_context(&self) -> Self {
        match self.scope {
            Scope::Persistent => Self::with_area(Scope::Persistent, self.area.clone()),
            Scope::Volatile => Self::volatile(),
        }
    }

    /// Limits the total size (keys plus values, in bytes) of the area. `None` removes the limit.
    pub fn set_quota(&self, bytes: Option<usize>) {
        self.area.quota_bytes.store(bytes.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    pub fn quota(&self) -> Option<usize> {
        match self.area.quota_bytes.load(Ordering::SeqCst) {
            usize::MAX => None,
            bytes => Some(bytes),
        }
    }

    /// Current size of the area in bytes.
    pub fn usage(&self) -> usize {
        let data = self.area.data.read().unwrap();
        Area::usage(&data)
    }

    /// Subscribes to changes made by other contexts of this area.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            receiver: self.area.events.subscribe(),
            context: self.context,
        }
    }

    fn notify(&self, key: Option<&str>, new_value: Option<&str>) {
        if self.scope != Scope::Persistent {
            return;
        }
        let envelope = Envelope {
            source: self.context,
            event: StorageEvent {
                key: key.map(str::to_string),
                new_value: new_value.map(str::to_string),
            },
        };
        // No receivers is fine.
        let _ = self.area.events.send(envelope);
    }

    fn write<F>(&self, mutate: F) -> HostResult<()>
    where
        F: FnOnce(&mut AreaData),
    {
        let mut data = self.area.data.write().unwrap();
        let mut next = data.clone();
        mutate(&mut next);

        let quota = self.area.quota_bytes.load(Ordering::SeqCst);
        let used = Area::usage(&next);
        if used > quota {
            return Err(HostError::new(
                HostErrorKind::QuotaExceeded,
                format!("{} storage quota of {} bytes exceeded ({} bytes)", self.scope, quota, used),
            ));
        }

        self.area.persist(&next)?;
        *data = next;
        Ok(())
    }
}

impl ScopedStore for MemScopedStore {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn get_item(&self, key: &str) -> Option<String> {
        let data = self.area.data.read().unwrap();
        data.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> HostResult<()> {
        self.write(|data| {
            data.insert(key.to_string(), value.to_string());
        })?;
        self.notify(Some(key), Some(value));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> HostResult<()> {
        if self.get_item(key).is_none() {
            return Ok(());
        }
        self.write(|data| {
            data.remove(key);
        })?;
        self.notify(Some(key), None);
        Ok(())
    }

    fn clear(&self) -> HostResult<()> {
        self.write(|data| data.clear())?;
        self.notify(None, None);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let data = self.area.data.read().unwrap();
        data.keys().cloned().collect()
    }
}

/// Change notifications for one context. Changes made by that context itself are skipped.
pub struct StorageEvents {
    receiver: broadcast::Receiver<Envelope>,
    context: u64,
}

impl StorageEvents {
    /// Waits for the next change made elsewhere. Returns `None` once the area is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.source == self.context => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Storage event subscriber lagged, {} events dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next pending change without waiting.
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.source == self.context => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    log::warn!("Storage event subscriber lagged, {} events dropped", n);
                }
                Err(_) => return None,
            }
        }
    }
}
