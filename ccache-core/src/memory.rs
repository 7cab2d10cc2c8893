//! # Memory Accounting, Defrag, and the Limiter
//!
//! Purpose: Logical byte accounting per kind, fragmentation tracking
//! against process RSS, periodic shard compaction, and the optional
//! memory ceiling with string-shard eviction.
//!
//! ## Design Principles
//! 1. **Logical Sizes**: Accounting sums key/field/value lengths (plus a
//!    fixed 8 bytes per zset score and 128 per stream entry); allocator
//!    overhead is intentionally ignored.
//! 2. **Quiesced Swaps**: The defragmenter rebuilds shard registries only
//!    while holding the EXEC barrier in write mode, so the pointer swap can
//!    never lose a concurrent write.
//! 3. **Evict, Then Fail**: The limiter evicts string keys down to the
//!    ceiling; callers only see OOM when nothing evictable remains.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::db::{Db, TaskHandle};

/// Approximate bytes per stream entry used by the accounting.
const STREAM_ENTRY_BYTES: usize = 128;

/// Point-in-time memory summary for MEMORY STATS and INFO.
#[derive(Debug, Clone)]
pub struct MemoryReport {
    /// `(kind name, bytes)` per populated kind.
    pub per_kind: Vec<(&'static str, usize)>,
    pub logical_bytes: usize,
    pub rss_bytes: usize,
    /// `(rss - logical) / logical`, clamped at zero; 1.0 when unknown.
    pub fragmentation: f64,
    pub expired_keys: u64,
    pub evicted_keys: u64,
    pub defrag_runs: u64,
}

impl Db {
    /// MEMORY USAGE: logical size of one key, or None when absent.
    pub fn memory_usage(&self, key: &str) -> Option<usize> {
        self.expire_if_due(key);
        let kind = self.keyspace.kind_of(key)?;
        Some(self.key_bytes(key, kind))
    }

    fn key_bytes(&self, key: &str, kind: ccache_common::ValueKind) -> usize {
        use ccache_common::ValueKind as K;
        let base = key.len();
        let body_bytes = match kind {
            K::Str => self
                .keyspace
                .strings
                .load(key)
                .map(|b| b.read().len())
                .unwrap_or(0),
            K::Hash => self
                .keyspace
                .hashes
                .load(key)
                .map(|b| b.read().iter().map(|(f, v)| f.len() + v.len()).sum())
                .unwrap_or(0),
            K::List => self
                .keyspace
                .lists
                .load(key)
                .map(|b| b.read().iter().map(|v| v.len()).sum())
                .unwrap_or(0),
            K::Set => self
                .keyspace
                .sets
                .load(key)
                .map(|b| b.read().iter().map(|v| v.len()).sum())
                .unwrap_or(0),
            K::ZSet => self
                .keyspace
                .zsets
                .load(key)
                .map(|b| b.read().footprint())
                .unwrap_or(0),
            K::Stream => self
                .keyspace
                .streams
                .load(key)
                .map(|b| b.read().entries.len() * STREAM_ENTRY_BYTES)
                .unwrap_or(0),
            K::Bitmap => self
                .keyspace
                .bitmaps
                .load(key)
                .map(|b| b.read().len())
                .unwrap_or(0),
            K::Json => self
                .keyspace
                .json
                .load(key)
                .map(|b| b.read().to_string().len())
                .unwrap_or(0),
            K::Geo => self
                .keyspace
                .geo
                .load(key)
                .map(|b| b.read().points.keys().map(|m| m.len() + 16).sum())
                .unwrap_or(0),
            // Sketches report their serialized footprint.
            K::Hll | K::Bloom | K::Cuckoo | K::Cms | K::TDigest | K::TopK | K::Suggest => self
                .record_for(key)
                .and_then(|r| r.body.map(|b| b.len()))
                .unwrap_or(0),
        };
        base + body_bytes
    }

    /// Total logical bytes across every kind.
    pub fn logical_bytes(&self) -> usize {
        self.keyspace
            .keys()
            .into_iter()
            .filter_map(|key| {
                let kind = self.keyspace.kind_of(&key)?;
                Some(self.key_bytes(&key, kind))
            })
            .sum()
    }

    /// MEMORY STATS summary.
    pub fn memory_report(&self) -> MemoryReport {
        use ccache_common::ValueKind;

        let mut per_kind: Vec<(&'static str, usize)> = Vec::new();
        for kind in ValueKind::all() {
            let bytes: usize = self
                .keyspace
                .keys()
                .into_iter()
                .filter(|key| self.keyspace.kind_of(key) == Some(*kind))
                .map(|key| self.key_bytes(&key, *kind))
                .sum();
            if bytes > 0 {
                per_kind.push((kind.type_name(), bytes));
            }
        }

        let logical_bytes = per_kind.iter().map(|(_, b)| b).sum();
        let rss_bytes = process_rss_bytes();
        let fragmentation = if logical_bytes == 0 || rss_bytes == 0 {
            1.0
        } else {
            ((rss_bytes as f64 - logical_bytes as f64) / logical_bytes as f64).max(0.0)
        };

        MemoryReport {
            per_kind,
            logical_bytes,
            rss_bytes,
            fragmentation,
            expired_keys: self.stats.expired_keys.load(Ordering::Relaxed),
            evicted_keys: self.stats.evicted_keys.load(Ordering::Relaxed),
            defrag_runs: self.stats.defrag_runs.load(Ordering::Relaxed),
        }
    }

    /// One defragmenter tick: rebuild-and-swap every shard registry when
    /// fragmentation is above the configured threshold. Returns whether a
    /// rebuild ran.
    pub fn defrag_tick(&self) -> bool {
        let report = self.memory_report();
        if report.fragmentation <= self.config.frag_threshold {
            return false;
        }
        // Quiesce foreground operations for the swap.
        let _guard = self.barrier.write();
        self.keyspace.rebuild_all();
        self.stats.defrag_runs.fetch_add(1, Ordering::Relaxed);
        debug!(
            fragmentation = report.fragmentation,
            "defragmented shard registries"
        );
        true
    }

    /// One limiter tick: evict string keys until logical usage is back
    /// under the ceiling. Returns the number of evictions.
    pub fn memory_tick(&self) -> usize {
        let Some(limit) = self.config.max_memory else {
            return 0;
        };
        let mut evicted = 0;
        while self.logical_bytes() > limit {
            let Some(victim) = self
                .keyspace
                .strings
                .keys()
                .into_iter()
                .next()
            else {
                warn!("memory limit exceeded with no evictable string keys");
                break;
            };
            self.keyspace.remove(&victim);
            self.expirations.clear(&victim);
            self.versions.bump(&victim);
            self.stats.evicted_keys.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
        }
        evicted
    }

    pub fn start_defrag(self: &Arc<Self>, interval: Duration) -> TaskHandle {
        self.spawn_task(interval, |db| {
            db.defrag_tick();
        })
    }

    pub fn start_memory_monitor(self: &Arc<Self>, interval: Duration) -> TaskHandle {
        self.spawn_task(interval, |db| {
            let evicted = db.memory_tick();
            if evicted > 0 {
                debug!(evicted, "memory limiter evicted string keys");
            }
        })
    }
}

/// Resident set size from /proc; 0 where unavailable.
fn process_rss_bytes() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<usize>().ok())
            {
                return resident_pages * 4096;
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccache_common::CoreConfig;

    #[test]
    fn per_key_accounting_follows_the_rules() {
        let db = Db::new();
        db.set("s", "12345".to_string()).unwrap();
        assert_eq!(db.memory_usage("s"), Some(1 + 5));

        db.hset("h", &[("field".to_string(), "value".to_string())])
            .unwrap();
        assert_eq!(db.memory_usage("h"), Some(1 + 5 + 5));

        db.zadd("z", &[(1.0, "member".to_string())]).unwrap();
        assert_eq!(db.memory_usage("z"), Some(1 + 6 + 8));

        db.xadd("x", "1-0", vec![("a".to_string(), "b".to_string())])
            .unwrap();
        assert_eq!(db.memory_usage("x"), Some(1 + 128));

        assert_eq!(db.memory_usage("missing"), None);
    }

    #[test]
    fn report_sums_per_kind() {
        let db = Db::new();
        db.set("a", "xx".to_string()).unwrap();
        db.set("b", "yy".to_string()).unwrap();
        db.rpush("l", &["item".to_string()]).unwrap();

        let report = db.memory_report();
        let strings = report
            .per_kind
            .iter()
            .find(|(name, _)| *name == "string")
            .unwrap();
        assert_eq!(strings.1, (1 + 2) * 2);
        assert_eq!(report.logical_bytes, 6 + 1 + 4);
    }

    #[test]
    fn limiter_evicts_strings_down_to_ceiling() {
        let config = CoreConfig {
            max_memory: Some(64),
            ..CoreConfig::default()
        };
        let db = Db::with_config(config);
        for i in 0..10 {
            db.set(&format!("k{}", i), "x".repeat(32)).unwrap();
        }
        // A non-string survives eviction.
        db.rpush("list", &["keep".to_string()]).unwrap();

        let evicted = db.memory_tick();
        assert!(evicted > 0);
        assert!(db.logical_bytes() <= 64 + 33 + 9);
        assert_eq!(db.llen("list").unwrap(), 1);
        assert_eq!(
            db.stat(crate::db::StatField::EvictedKeys),
            evicted as u64
        );
    }

    #[test]
    fn defrag_preserves_visible_state() {
        let db = Db::new();
        for i in 0..50 {
            db.set(&format!("k{}", i), "value".to_string()).unwrap();
        }
        {
            let _guard = db.barrier.write();
            db.keyspace.rebuild_all();
        }
        for i in 0..50 {
            assert_eq!(db.get(&format!("k{}", i)).unwrap(), Some("value".to_string()));
        }
    }
}
