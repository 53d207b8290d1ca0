//! Per-connection prepared statement cache.
//!
//! Entries are keyed by SQL text plus prepare options and evicted in
//! least-recently-used order. The cache keeps its own reference to each
//! statement; a statement is only handed out again once its previous user
//! has logically closed it.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Behaviour the cache needs from a cached statement.
pub(crate) trait CacheEntry {
    /// Atomically flip a logically closed entry back to open.
    ///
    /// Returns `false` when the entry is still in use.
    fn try_reopen(&self) -> bool;

    /// Record whether the entry is currently owned by the cache.
    fn set_cached(&self, cached: bool);

    /// The entry left the cache; release it if nobody is using it.
    fn evicted(&self);
}

/// Bounded LRU mapping from cache key to statement.
pub(crate) struct StatementCache<T: CacheEntry> {
    entries: Mutex<LruCache<String, Arc<T>>>,
}

impl<T: CacheEntry> StatementCache<T> {
    /// Create a cache holding at most `capacity` statements.
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Take an idle cached statement for `key`, reopening it.
    pub(crate) fn checkout(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.try_reopen() {
            Some(Arc::clone(entry))
        } else {
            None
        }
    }

    /// Insert a freshly prepared statement unless `key` is already cached.
    ///
    /// Returns `true` if the statement is now owned by the cache.
    pub(crate) fn insert(&self, key: &str, entry: &Arc<T>) -> bool {
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.contains(key) {
                return false;
            }
            entry.set_cached(true);
            entries.push(key.to_string(), Arc::clone(entry))
        };

        if let Some((_, old)) = evicted {
            old.set_cached(false);
            old.evicted();
        }
        true
    }

    /// Remove every entry, releasing idle ones.
    pub(crate) fn clear(&self) {
        let drained: Vec<Arc<T>> = {
            let mut entries = self.entries.lock();
            let mut drained = Vec::with_capacity(entries.len());
            while let Some((_, entry)) = entries.pop_lru() {
                drained.push(entry);
            }
            drained
        };

        for entry in drained {
            entry.set_cached(false);
            entry.evicted();
        }
    }

    /// Number of cached statements.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStatement {
        closed: AtomicBool,
        cached: AtomicBool,
        released: AtomicUsize,
    }

    impl CacheEntry for FakeStatement {
        fn try_reopen(&self) -> bool {
            self.closed
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }

        fn set_cached(&self, cached: bool) {
            self.cached.store(cached, Ordering::SeqCst);
        }

        fn evicted(&self) {
            if self.closed.load(Ordering::SeqCst) {
                self.released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn cache(capacity: usize) -> StatementCache<FakeStatement> {
        StatementCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_checkout_only_returns_idle_statements() {
        let cache = cache(4);
        let stmt = Arc::new(FakeStatement::default());
        assert!(cache.insert("SELECT 1", &stmt));
        assert!(stmt.cached.load(Ordering::SeqCst));

        // still in use
        assert!(cache.checkout("SELECT 1").is_none());

        stmt.closed.store(true, Ordering::SeqCst);
        let again = cache.checkout("SELECT 1").unwrap();
        assert!(Arc::ptr_eq(&stmt, &again));
        assert!(!stmt.closed.load(Ordering::SeqCst));

        // reopened, so a second checkout misses
        assert!(cache.checkout("SELECT 1").is_none());
    }

    #[test]
    fn test_insert_keeps_existing_entry() {
        let cache = cache(4);
        let first = Arc::new(FakeStatement::default());
        let second = Arc::new(FakeStatement::default());
        assert!(cache.insert("k", &first));
        assert!(!cache.insert("k", &second));
        assert!(!second.cached.load(Ordering::SeqCst));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction_releases_idle_entry() {
        let cache = cache(2);
        let a = Arc::new(FakeStatement::default());
        let b = Arc::new(FakeStatement::default());
        let c = Arc::new(FakeStatement::default());
        a.closed.store(true, Ordering::SeqCst);
        cache.insert("a", &a);
        cache.insert("b", &b);
        cache.insert("c", &c);

        assert_eq!(cache.len(), 2);
        assert!(!a.cached.load(Ordering::SeqCst));
        assert_eq!(a.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_leaves_busy_entry_to_its_user() {
        let cache = cache(1);
        let busy = Arc::new(FakeStatement::default());
        cache.insert("busy", &busy);
        cache.insert("next", &Arc::new(FakeStatement::default()));

        assert!(!busy.cached.load(Ordering::SeqCst));
        assert_eq!(busy.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_uncaches_everything() {
        let cache = cache(3);
        let idle = Arc::new(FakeStatement::default());
        idle.closed.store(true, Ordering::SeqCst);
        let busy = Arc::new(FakeStatement::default());
        cache.insert("idle", &idle);
        cache.insert("busy", &busy);

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(idle.released.load(Ordering::SeqCst), 1);
        assert_eq!(busy.released.load(Ordering::SeqCst), 0);
        assert!(!busy.cached.load(Ordering::SeqCst));
    }
}
