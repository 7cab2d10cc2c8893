//! # Typed Shard Registry
//!
//! Purpose: One concurrent mapping per value kind, from key to a shared,
//! individually locked value body. Reads on different keys proceed in
//! parallel; writes serialize on a single body, never on the registry.
//!
//! ## Design Principles
//! 1. **Per-Body Locks**: The registry hands out `Arc<RwLock<B>>`; critical
//!    sections cover one value, not the map.
//! 2. **Single-Winner Insert**: `load_or_store` runs at most one factory per
//!    key under contention via the entry API.
//! 3. **Swappable Registry Pointer**: The inner map sits behind an `Arc` so
//!    the defragmenter can rebuild into a fresh map and swap it in one store.
//!    Callers must be quiesced (EXEC barrier held in write mode) during the
//!    swap.

use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;

/// Shared handle to one value body.
pub type Body<B> = Arc<RwLock<B>>;

type ShardMap<B> = DashMap<String, Body<B>, RandomState>;

/// Concurrent key -> body registry for a single value kind.
pub struct TypedShard<B> {
    inner: RwLock<Arc<ShardMap<B>>>,
}

impl<B> TypedShard<B> {
    pub fn new() -> Self {
        TypedShard {
            inner: RwLock::new(Arc::new(DashMap::with_hasher(RandomState::new()))),
        }
    }

    /// Clones the current registry pointer. The guard is held only long
    /// enough to copy the `Arc`.
    fn map(&self) -> Arc<ShardMap<B>> {
        self.inner.read().clone()
    }

    /// Returns the body for `key`, if present.
    pub fn load(&self, key: &str) -> Option<Body<B>> {
        self.map().get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the body for `key`, inserting the factory's product if the
    /// key is absent. Under contention only the winning factory's body is
    /// stored; losers receive the winner's.
    pub fn load_or_store(&self, key: &str, factory: impl FnOnce() -> B) -> Body<B> {
        let map = self.map();
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(factory())));
        Arc::clone(entry.value())
    }

    /// Inserts or replaces the body for `key`.
    pub fn store(&self, key: &str, body: Body<B>) {
        self.map().insert(key.to_string(), body);
    }

    /// Removes `key`. Returns true when an entry was present.
    pub fn remove(&self, key: &str) -> bool {
        self.map().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map().contains_key(key)
    }

    /// Visits every live entry. The callback must not re-enter the shard.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &Body<B>)) {
        for entry in self.map().iter() {
            visit(entry.key(), entry.value());
        }
    }

    /// Replaces the body of `key` with `new` iff the current body equals
    /// `expected`. The comparison and swap happen under the body's write
    /// lock, so no interleaving write can be lost.
    pub fn compare_and_swap(&self, key: &str, expected: &B, new: B) -> bool
    where
        B: PartialEq,
    {
        let Some(body) = self.load(key) else {
            return false;
        };
        let mut guard = body.write();
        if *guard == *expected {
            *guard = new;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn clear(&self) {
        self.map().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.map().iter().map(|e| e.key().clone()).collect()
    }

    /// Rebuilds the registry into a freshly allocated map and swaps the
    /// pointer. Entries keep their body `Arc`s, so held handles stay valid.
    /// Caller must hold the keyspace write barrier for the duration.
    pub fn rebuild(&self) {
        let fresh: ShardMap<B> = DashMap::with_hasher(RandomState::new());
        for entry in self.map().iter() {
            fresh.insert(entry.key().clone(), Arc::clone(entry.value()));
        }
        *self.inner.write() = Arc::new(fresh);
    }
}

impl<B> Default for TypedShard<B> {
    fn default() -> Self {
        TypedShard::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_store_single_winner() {
        let shard: TypedShard<Vec<u32>> = TypedShard::new();
        let first = shard.load_or_store("k", || vec![1]);
        let second = shard.load_or_store("k", || vec![2]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.read(), vec![1]);
    }

    #[test]
    fn compare_and_swap_checks_expected() {
        let shard: TypedShard<String> = TypedShard::new();
        shard.load_or_store("k", || "a".to_string());

        assert!(!shard.compare_and_swap("k", &"b".to_string(), "c".to_string()));
        assert!(shard.compare_and_swap("k", &"a".to_string(), "c".to_string()));
        assert_eq!(*shard.load("k").unwrap().read(), "c");
        assert!(!shard.compare_and_swap("missing", &"a".to_string(), "x".to_string()));
    }

    #[test]
    fn rebuild_preserves_entries_and_bodies() {
        let shard: TypedShard<u64> = TypedShard::new();
        let body = shard.load_or_store("k", || 7);
        shard.rebuild();
        let reloaded = shard.load("k").unwrap();
        assert!(Arc::ptr_eq(&body, &reloaded));
        assert_eq!(*reloaded.read(), 7);
    }

    #[test]
    fn concurrent_load_or_store_runs_one_factory() {
        let shard = Arc::new(TypedShard::<u32>::new());
        let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shard = Arc::clone(&shard);
                let hits = Arc::clone(&hits);
                std::thread::spawn(move || {
                    shard.load_or_store("k", || {
                        hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        42
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(*shard.load("k").unwrap().read(), 42);
    }
}
