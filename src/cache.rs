//! Bounded TTL caches.
//!
//! Best-effort and disposable: entries expire after a fixed TTL, expired
//! entries are evicted on read, and inserts over capacity push out the entry
//! closest to expiry. Nothing here is load-bearing — every lookup has a
//! store-backed fallback. Caches are constructed once and injected into the
//! request-scoped service rather than living as ambient globals.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.inner.lock().expect("cache lock poisoned");
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut map = self.inner.lock().expect("cache lock poisoned");
        let now = Instant::now();
        map.retain(|_, entry| entry.expires_at > now);
        if map.len() >= self.capacity && !map.contains_key(&key) {
            // Full of live entries: drop whichever expires soonest.
            if let Some(evict) = map
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                map.remove(&evict);
            }
        }
        map.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.lock().expect("cache lock poisoned").remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_and_are_evicted_on_read() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(20), 8);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_is_bounded() {
        let cache: TtlCache<i32, i32> = TtlCache::new(Duration::from_secs(60), 3);
        for i in 0..10 {
            cache.insert(i, i);
        }
        assert!(cache.len() <= 3);
    }

    #[test]
    fn invalidate_removes_immediately() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60), 8);
        cache.insert("a", 1);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
    }
}
