use dashmap::DashMap;
use pantry_core::Record;
use tokio::sync::broadcast;

use crate::collection::Collection;
use crate::key::QueryKey;
use crate::ReadCache;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// In-memory [`ReadCache`] shared by every open view.
///
/// Collections change only through [`populate`](Self::populate),
/// [`invalidate`](Self::invalidate) and [`ReadCache::set`]; each change is
/// announced on [`subscribe_changes`](Self::subscribe_changes).
pub struct MemoryCache {
    entries: DashMap<QueryKey, Collection>,
    changes: broadcast::Sender<QueryKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    /// Store a freshly fetched result, replacing whatever was cached.
    pub fn populate(&self, key: QueryKey, records: impl IntoIterator<Item = Record>) {
        let collection = Collection::from_records(records);
        tracing::debug!(key = %key, records = collection.len(), "cache populated");
        let _ = self.entries.insert(key.clone(), collection);
        self.notify(key);
    }

    /// Forget a cached result so the next read triggers a refetch.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.notify(key.clone());
        }
        removed
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Keys whose collection changed, in change order. Slow receivers may lag.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<QueryKey> {
        self.changes.subscribe()
    }

    fn notify(&self, key: QueryKey) {
        // No receivers is fine.
        let _ = self.changes.send(key);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadCache for MemoryCache {
    fn get(&self, key: &QueryKey) -> Option<Collection> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn set(&self, key: &QueryKey, updater: &mut dyn FnMut(Collection) -> Collection) -> bool {
        // The shard stays write-locked while `updater` runs; it must not touch the cache.
        let changed = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return false;
            };
            let next = updater(entry.value().clone());
            let changed = next != *entry.value();
            *entry.value_mut() = next;
            changed
        };
        if changed {
            self.notify(key.clone());
        }
        true
    }
}
