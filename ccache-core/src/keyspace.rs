//! # Typed Keyspace
//!
//! Purpose: One `ValueKind` tag registry plus one `TypedShard` per kind.
//! The tag map is the single source of truth for type exclusivity: a key
//! appears in at most one body shard, and the tag says which.
//!
//! Routing by declared kind keeps "a key of type T" a static property that
//! generic commands (TYPE, KEYS, DEL, snapshots) can observe without taking
//! any body lock.

use std::collections::{HashMap, HashSet, VecDeque};

use ahash::RandomState;
use dashmap::DashMap;
use rand::Rng;

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::engines::geo::GeoBody;
use crate::engines::stream::StreamBody;
use crate::engines::zset::ZSetBody;
use crate::prob::bloom::BloomFilter;
use crate::prob::cms::CountMinSketch;
use crate::prob::cuckoo::CuckooFilter;
use crate::prob::hll::Hll;
use crate::prob::suggest::SuggestDict;
use crate::prob::tdigest::TDigest;
use crate::prob::topk::TopK;
use crate::shard::TypedShard;

pub struct Keyspace {
    tags: DashMap<String, ValueKind, RandomState>,
    pub strings: TypedShard<String>,
    pub hashes: TypedShard<HashMap<String, String>>,
    pub lists: TypedShard<VecDeque<String>>,
    pub sets: TypedShard<HashSet<String>>,
    pub zsets: TypedShard<ZSetBody>,
    pub streams: TypedShard<StreamBody>,
    pub bitmaps: TypedShard<Vec<u8>>,
    pub json: TypedShard<serde_json::Value>,
    pub geo: TypedShard<GeoBody>,
    pub hll: TypedShard<Hll>,
    pub bloom: TypedShard<BloomFilter>,
    pub cuckoo: TypedShard<CuckooFilter>,
    pub cms: TypedShard<CountMinSketch>,
    pub tdigest: TypedShard<TDigest>,
    pub topk: TypedShard<TopK>,
    pub suggest: TypedShard<SuggestDict>,
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            tags: DashMap::with_hasher(RandomState::new()),
            strings: TypedShard::new(),
            hashes: TypedShard::new(),
            lists: TypedShard::new(),
            sets: TypedShard::new(),
            zsets: TypedShard::new(),
            streams: TypedShard::new(),
            bitmaps: TypedShard::new(),
            json: TypedShard::new(),
            geo: TypedShard::new(),
            hll: TypedShard::new(),
            bloom: TypedShard::new(),
            cuckoo: TypedShard::new(),
            cms: TypedShard::new(),
            tdigest: TypedShard::new(),
            topk: TypedShard::new(),
            suggest: TypedShard::new(),
        }
    }

    /// Declared kind of `key`, if the key exists.
    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.tags.get(key).map(|tag| *tag)
    }

    /// Claims `key` for `kind`, creating the tag when absent. Fails with a
    /// type error when the key already belongs to another kind.
    pub fn claim(&self, key: &str, kind: ValueKind) -> CacheResult<()> {
        let tag = self.tags.entry(key.to_string()).or_insert(kind);
        if *tag != kind {
            return Err(CacheError::WrongType);
        }
        Ok(())
    }

    /// Read-side type check: `Ok(true)` when the key exists under `kind`,
    /// `Ok(false)` when absent, type error when held by another kind.
    pub fn check(&self, key: &str, kind: ValueKind) -> CacheResult<bool> {
        match self.tags.get(key) {
            None => Ok(false),
            Some(tag) if *tag == kind => Ok(true),
            Some(_) => Err(CacheError::WrongType),
        }
    }

    /// Removes `key` from the tag map and its body shard. Returns whether a
    /// live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let Some((_, kind)) = self.tags.remove(key) else {
            return false;
        };
        self.remove_body(key, kind);
        true
    }

    fn remove_body(&self, key: &str, kind: ValueKind) {
        match kind {
            ValueKind::Str => self.strings.remove(key),
            ValueKind::Hash => self.hashes.remove(key),
            ValueKind::List => self.lists.remove(key),
            ValueKind::Set => self.sets.remove(key),
            ValueKind::ZSet => self.zsets.remove(key),
            ValueKind::Stream => self.streams.remove(key),
            ValueKind::Bitmap => self.bitmaps.remove(key),
            ValueKind::Json => self.json.remove(key),
            ValueKind::Geo => self.geo.remove(key),
            ValueKind::Hll => self.hll.remove(key),
            ValueKind::Bloom => self.bloom.remove(key),
            ValueKind::Cuckoo => self.cuckoo.remove(key),
            ValueKind::Cms => self.cms.remove(key),
            ValueKind::TDigest => self.tdigest.remove(key),
            ValueKind::TopK => self.topk.remove(key),
            ValueKind::Suggest => self.suggest.remove(key),
        };
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.tags.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Uniformly random live key, or None when the keyspace is empty.
    pub fn random_key(&self) -> Option<String> {
        let len = self.tags.len();
        if len == 0 {
            return None;
        }
        let skip = rand::thread_rng().gen_range(0..len);
        self.tags.iter().nth(skip).map(|entry| entry.key().clone())
    }

    pub fn clear_all(&self) {
        self.tags.clear();
        self.strings.clear();
        self.hashes.clear();
        self.lists.clear();
        self.sets.clear();
        self.zsets.clear();
        self.streams.clear();
        self.bitmaps.clear();
        self.json.clear();
        self.geo.clear();
        self.hll.clear();
        self.bloom.clear();
        self.cuckoo.clear();
        self.cms.clear();
        self.tdigest.clear();
        self.topk.clear();
        self.suggest.clear();
    }

    /// Rebuilds every shard registry into fresh maps. Caller must hold the
    /// keyspace write barrier (see the defragmenter).
    pub fn rebuild_all(&self) {
        self.strings.rebuild();
        self.hashes.rebuild();
        self.lists.rebuild();
        self.sets.rebuild();
        self.zsets.rebuild();
        self.streams.rebuild();
        self.bitmaps.rebuild();
        self.json.rebuild();
        self.geo.rebuild();
        self.hll.rebuild();
        self.bloom.rebuild();
        self.cuckoo.rebuild();
        self.cms.rebuild();
        self.tdigest.rebuild();
        self.topk.rebuild();
        self.suggest.rebuild();
    }

    /// Moves `old` to `new` within its shard, keeping the body `Arc`.
    /// Any existing value at `new` is removed first.
    pub fn rename(&self, old: &str, new: &str) -> CacheResult<()> {
        let kind = self.kind_of(old).ok_or(CacheError::NoSuchKey)?;
        self.remove(new);
        match kind {
            ValueKind::Str => move_entry(&self.strings, old, new),
            ValueKind::Hash => move_entry(&self.hashes, old, new),
            ValueKind::List => move_entry(&self.lists, old, new),
            ValueKind::Set => move_entry(&self.sets, old, new),
            ValueKind::ZSet => move_entry(&self.zsets, old, new),
            ValueKind::Stream => move_entry(&self.streams, old, new),
            ValueKind::Bitmap => move_entry(&self.bitmaps, old, new),
            ValueKind::Json => move_entry(&self.json, old, new),
            ValueKind::Geo => move_entry(&self.geo, old, new),
            ValueKind::Hll => move_entry(&self.hll, old, new),
            ValueKind::Bloom => move_entry(&self.bloom, old, new),
            ValueKind::Cuckoo => move_entry(&self.cuckoo, old, new),
            ValueKind::Cms => move_entry(&self.cms, old, new),
            ValueKind::TDigest => move_entry(&self.tdigest, old, new),
            ValueKind::TopK => move_entry(&self.topk, old, new),
            ValueKind::Suggest => move_entry(&self.suggest, old, new),
        }
        self.tags.remove(old);
        self.tags.insert(new.to_string(), kind);
        Ok(())
    }
}

fn move_entry<B>(shard: &TypedShard<B>, old: &str, new: &str) {
    if let Some(body) = shard.load(old) {
        shard.store(new, body);
        shard.remove(old);
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Keyspace::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_enforces_type_exclusivity() {
        let ks = Keyspace::new();
        ks.claim("k", ValueKind::List).unwrap();
        ks.lists.load_or_store("k", VecDeque::new);

        assert_eq!(ks.claim("k", ValueKind::Str), Err(CacheError::WrongType));
        assert_eq!(ks.check("k", ValueKind::Set), Err(CacheError::WrongType));
        assert_eq!(ks.check("k", ValueKind::List), Ok(true));
        assert_eq!(ks.check("missing", ValueKind::List), Ok(false));
    }

    #[test]
    fn remove_clears_tag_and_body() {
        let ks = Keyspace::new();
        ks.claim("k", ValueKind::Str).unwrap();
        ks.strings.load_or_store("k", || "v".to_string());

        assert!(ks.remove("k"));
        assert!(ks.kind_of("k").is_none());
        assert!(ks.strings.load("k").is_none());
        assert!(!ks.remove("k"));
    }

    #[test]
    fn rename_moves_body_and_overwrites_dest() {
        let ks = Keyspace::new();
        ks.claim("a", ValueKind::Str).unwrap();
        ks.strings.load_or_store("a", || "va".to_string());
        ks.claim("b", ValueKind::List).unwrap();
        ks.lists.load_or_store("b", VecDeque::new);

        ks.rename("a", "b").unwrap();
        assert_eq!(ks.kind_of("b"), Some(ValueKind::Str));
        assert!(ks.kind_of("a").is_none());
        assert_eq!(*ks.strings.load("b").unwrap().read(), "va");
        assert!(ks.lists.load("b").is_none());

        assert_eq!(ks.rename("missing", "x"), Err(CacheError::NoSuchKey));
    }
}
