//
// Expiring key/value map with lazy eviction and an optional background sweep
//
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::util::now_millis;

struct Entry<V> {
    value: V,
    // Absolute epoch-ms deadline; `None` never expires
    expires_at: Option<i64>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// TTL cache. Reads go through the sharded map without a global lock; an
/// expired entry is dropped by the `get` that finds it. A background sweeper
/// can be attached to bound memory for entries nobody reads again.
pub struct Cache<K, V> {
    entries: DashMap<K, Entry<V>>,
    default_ttl: Option<Duration>,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: None,
            sweeper: StdMutex::new(None),
        }
    }

    /// Entries stored via [`set`](Self::set) expire after `ttl`.
    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: Some(ttl),
            sweeper: StdMutex::new(None),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => {
                if !entry.is_expired(now_millis()) {
                    return Some(entry.value.clone());
                }
                true
            }
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| now_millis() + ttl.as_millis() as i64);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
            },
        );
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live (unexpired) entries.
    pub fn size(&self) -> usize {
        let now = now_millis();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Drop every expired entry now.
    pub fn sweep(&self) {
        let now = now_millis();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Periodically sweep in the background. The task holds a weak handle so
    /// dropping the last `Arc` ends it; dropping the cache aborts it too.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => break,
                }
            }
        });
        let previous = self.sweeper.lock().expect("sweeper handle poisoned").replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.len()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}
