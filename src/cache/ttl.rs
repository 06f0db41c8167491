use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

struct Entry<V> {
    value: V,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

/// String-keyed cache with one TTL for every entry.
///
/// Expiry is lazy: a stale entry is dropped the next time it is looked up.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expires_at.map_or(true, |at| Instant::now() < at) => {
                return Some(entry.value.clone())
            }
            Some(_) => {}
            None => return None,
        }
        entries.remove(key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(self.ttl),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Drop every entry; returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let n = entries.len();
        entries.clear();
        n
    }

    /// Entries held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("profile", 1);
        assert_eq!(cache.get("profile"), Some(1));
        assert_eq!(cache.get("profile"), Some(1));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("profile", "x");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("profile"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn oversized_ttl_never_expires() {
        let cache = TtlCache::new(Duration::from_secs(u64::MAX));
        cache.insert("profile", 1);
        assert_eq!(cache.get("profile"), Some(1));
    }

    #[test]
    fn clear_reports_count() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3);
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.get("a"), None);
    }
}
