//! # Database Core
//!
//! Purpose: Wire the keyspace, expiration index, version registry, session
//! table, and background tasks into one shared handle. Engine modules add
//! their per-kind operations as further `impl Db` blocks.
//!
//! ## Design Principles
//! 1. **Short Critical Sections**: Generic commands touch the tag map and
//!    at most one body lock at a time.
//! 2. **Lazy Expiration Everywhere**: Every path that can observe a key runs
//!    `expire_if_due` first; an observed past deadline deletes before the
//!    caller sees the key.
//! 3. **Mutations Bump, Reads Never**: `touch_write` is the single funnel
//!    for version bumps and persistence records.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use ccache_common::{CacheError, CacheResult, CoreConfig, ValueKind};

use crate::expire::{ExpirationIndex, ExpireMode};
use crate::keyspace::Keyspace;
use crate::pattern::PatternMatcher;
use crate::snapshot::SnapshotRecord;
use crate::txn::{SessionId, SessionRegistry};
use crate::version::VersionRegistry;

/// Callback invoked with a state record after every successful mutation,
/// when persistence is enabled.
pub trait MutationSink: Send + Sync {
    fn write(&self, record: &SnapshotRecord);
}

/// Counters surfaced by INFO and MEMORY STATS.
#[derive(Debug, Default)]
pub struct Stats {
    pub commands: AtomicU64,
    pub expired_keys: AtomicU64,
    pub evicted_keys: AtomicU64,
    pub defrag_runs: AtomicU64,
    pub exec_aborts: AtomicU64,
}

pub struct Db {
    pub(crate) keyspace: Keyspace,
    pub(crate) versions: VersionRegistry,
    pub(crate) expirations: ExpirationIndex,
    pub(crate) sessions: SessionRegistry,
    pub(crate) patterns: PatternMatcher,
    pub(crate) stats: Stats,
    /// Read mode for foreground commands, write mode for EXEC and the
    /// defragmenter's swap phase.
    pub(crate) barrier: RwLock<()>,
    pub(crate) config: CoreConfig,
    sink: RwLock<Option<Arc<dyn MutationSink>>>,
}

/// Handle for a background task thread. Call `stop` to signal shutdown and
/// join; dropping without stopping leaves the thread running for the
/// process lifetime.
pub struct TaskHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Db {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let patterns = PatternMatcher::new(config.pattern_cache_size);
        Db {
            keyspace: Keyspace::new(),
            versions: VersionRegistry::new(),
            expirations: ExpirationIndex::new(),
            sessions: SessionRegistry::new(),
            patterns,
            stats: Stats::default(),
            barrier: RwLock::new(()),
            config,
            sink: RwLock::new(None),
        }
    }

    /// Installs the persistence callback. Pass `None` to disable.
    pub fn set_mutation_sink(&self, sink: Option<Arc<dyn MutationSink>>) {
        *self.sink.write() = sink;
    }

    /// Disconnect cleanup for a session: drops any MULTI queue, always
    /// unwatches.
    pub fn end_session(&self, session: SessionId) {
        self.sessions.end_session(session);
    }

    pub fn version_of(&self, key: &str) -> u64 {
        self.versions.read(key)
    }

    // ---- internal plumbing used by every engine ------------------------

    /// Deletes `key` if its deadline has passed. Expiration is a mutation:
    /// the version bumps so stale watches abort.
    pub(crate) fn expire_if_due(&self, key: &str) {
        if !self.expirations.is_due(key, Instant::now()) {
            return;
        }
        self.expirations.clear(key);
        if self.keyspace.remove(key) {
            self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
            self.versions.bump(key);
        }
    }

    /// Post-mutation funnel: bump the version and emit a persistence record
    /// when a sink is installed.
    pub(crate) fn touch_write(&self, key: &str) {
        self.versions.bump(key);
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            let record = self
                .record_for(key)
                .unwrap_or_else(|| SnapshotRecord::tombstone(key));
            sink.write(&record);
        }
    }

    /// Container-emptiness purge: removes the key when its container body
    /// reached zero elements.
    pub(crate) fn purge_if_empty(&self, key: &str, empty: bool) {
        if empty {
            self.keyspace.remove(key);
            self.expirations.clear(key);
        }
    }

    // ---- generic keyspace commands -------------------------------------

    /// DEL / UNLINK. Returns the number of keys removed.
    pub fn del(&self, keys: &[String]) -> i64 {
        let mut removed = 0;
        for key in keys {
            self.expire_if_due(key);
            if self.keyspace.remove(key) {
                self.expirations.clear(key);
                self.touch_write(key);
                removed += 1;
            }
        }
        removed
    }

    pub fn exists(&self, keys: &[String]) -> i64 {
        keys.iter()
            .filter(|key| {
                self.expire_if_due(key);
                self.keyspace.kind_of(key).is_some()
            })
            .count() as i64
    }

    /// TYPE. `None` when the key does not exist.
    pub fn type_of(&self, key: &str) -> Option<ValueKind> {
        self.expire_if_due(key);
        self.keyspace.kind_of(key)
    }

    /// KEYS. Pattern-filtered scan over live keys; expired keys observed
    /// during the walk are removed before the result is built.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut out = Vec::new();
        for key in self.keyspace.keys() {
            self.expire_if_due(&key);
            if self.keyspace.kind_of(&key).is_some() && self.patterns.matches(pattern, &key) {
                out.push(key);
            }
        }
        out.sort();
        out
    }

    /// SCAN. Cursor is an offset into the sorted live keyspace; 0 ends the
    /// iteration. Every key present for the whole scan is returned at most
    /// once per pass.
    pub fn scan(&self, cursor: u64, pattern: Option<&str>, count: usize) -> (u64, Vec<String>) {
        let matched = match pattern {
            Some(p) => self.keys(p),
            None => self.keys("*"),
        };
        paginate(matched, cursor, count)
    }

    pub fn random_key(&self) -> Option<String> {
        loop {
            let key = self.keyspace.random_key()?;
            self.expire_if_due(&key);
            if self.keyspace.kind_of(&key).is_some() {
                return Some(key);
            }
        }
    }

    /// RENAME. Carries the expiration entry along with the body.
    pub fn rename(&self, old: &str, new: &str) -> CacheResult<()> {
        self.expire_if_due(old);
        if self.keyspace.kind_of(old).is_none() {
            return Err(CacheError::NoSuchKey);
        }

        let deadline = self.expirations.peek(old);
        self.keyspace.rename(old, new)?;
        self.expirations.clear(old);
        self.expirations.clear(new);
        if let Some(deadline) = deadline {
            self.expirations.set(new, deadline, ExpireMode::Always);
        }
        self.touch_write(old);
        self.touch_write(new);
        Ok(())
    }

    pub fn dbsize(&self) -> i64 {
        self.keyspace.len() as i64
    }

    /// FLUSHALL. Bumps every removed key so outstanding watches abort.
    pub fn flush_all(&self) {
        for key in self.keyspace.keys() {
            self.versions.bump(&key);
        }
        self.keyspace.clear_all();
        self.expirations.clear_all();
    }

    // ---- expiration commands -------------------------------------------

    /// EXPIRE / PEXPIRE with condition modes. Returns whether the deadline
    /// was applied.
    pub fn expire_key(&self, key: &str, ttl: Duration, mode: ExpireMode) -> bool {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_none() {
            return false;
        }
        let applied = self.expirations.set(key, Instant::now() + ttl, mode);
        if applied {
            self.touch_write(key);
        }
        applied
    }

    /// TTL in seconds: -2 missing, -1 no expiration, else remaining
    /// (rounded up, matching the wire convention).
    pub fn ttl(&self, key: &str) -> i64 {
        match self.pttl(key) {
            n if n < 0 => n,
            ms => (ms + 999) / 1000,
        }
    }

    /// PTTL with millisecond resolution.
    pub fn pttl(&self, key: &str) -> i64 {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_none() {
            return -2;
        }
        match self.expirations.remaining(key, Instant::now()) {
            None => -1,
            Some(remaining) => remaining.as_millis() as i64,
        }
    }

    /// PERSIST. Returns whether an expiration was removed.
    pub fn persist(&self, key: &str) -> bool {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_none() {
            return false;
        }
        let cleared = self.expirations.clear(key);
        if cleared {
            self.touch_write(key);
        }
        cleared
    }

    // ---- background tasks ----------------------------------------------

    /// Starts the expiration sweeper at the configured cadence.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> TaskHandle {
        self.spawn_task(interval, |db| {
            let removed = db.sweep_tick();
            if removed > 0 {
                debug!(removed, "expiration sweep");
            }
        })
    }

    /// One sweeper tick: bounded sample, per-key critical sections only.
    pub fn sweep_tick(&self) -> usize {
        let due = self
            .expirations
            .sweep(Instant::now(), self.config.sweep_sample);
        let mut removed = 0;
        for key in due {
            if self.keyspace.remove(&key) {
                self.stats.expired_keys.fetch_add(1, Ordering::Relaxed);
                self.versions.bump(&key);
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn spawn_task(
        self: &Arc<Self>,
        interval: Duration,
        tick: impl Fn(&Db) + Send + 'static,
    ) -> TaskHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let db = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                tick(&db);
            }
        });

        TaskHandle {
            stop,
            join: Some(join),
        }
    }

    /// Snapshot of the stat counters.
    pub fn stat(&self, which: StatField) -> u64 {
        match which {
            StatField::Commands => self.stats.commands.load(Ordering::Relaxed),
            StatField::ExpiredKeys => self.stats.expired_keys.load(Ordering::Relaxed),
            StatField::EvictedKeys => self.stats.evicted_keys.load(Ordering::Relaxed),
            StatField::DefragRuns => self.stats.defrag_runs.load(Ordering::Relaxed),
            StatField::ExecAborts => self.stats.exec_aborts.load(Ordering::Relaxed),
        }
    }
}

/// Stat counter selector for `Db::stat`.
#[derive(Debug, Clone, Copy)]
pub enum StatField {
    Commands,
    ExpiredKeys,
    EvictedKeys,
    DefragRuns,
    ExecAborts,
}

impl Default for Db {
    fn default() -> Self {
        Db::new()
    }
}

/// Offset-cursor pagination shared by SCAN and the per-container scans.
pub(crate) fn paginate(items: Vec<String>, cursor: u64, count: usize) -> (u64, Vec<String>) {
    let start = cursor as usize;
    if start >= items.len() {
        return (0, Vec::new());
    }
    let count = count.max(1);
    let end = (start + count).min(items.len());
    let next = if end == items.len() { 0 } else { end as u64 };
    (next, items[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn del_exists_type_roundtrip() {
        let db = Db::new();
        db.set("k", "v".to_string()).unwrap();

        assert_eq!(db.exists(&["k".to_string(), "missing".to_string()]), 1);
        assert_eq!(db.type_of("k"), Some(ValueKind::Str));
        assert_eq!(db.del(&["k".to_string()]), 1);
        assert_eq!(db.del(&["k".to_string()]), 0);
        assert_eq!(db.type_of("k"), None);
    }

    #[test]
    fn version_bumps_on_mutations_only() {
        let db = Db::new();
        assert_eq!(db.version_of("k"), 0);
        db.set("k", "v".to_string()).unwrap();
        let after_set = db.version_of("k");
        assert_eq!(after_set, 1);

        db.get("k").unwrap();
        assert_eq!(db.version_of("k"), after_set);

        db.del(&["k".to_string()]);
        assert!(db.version_of("k") > after_set);
    }

    #[test]
    fn ttl_reporting_matches_wire_semantics() {
        let db = Db::new();
        assert_eq!(db.ttl("missing"), -2);

        db.set("k", "v".to_string()).unwrap();
        assert_eq!(db.ttl("k"), -1);

        db.expire_key("k", Duration::from_secs(10), ExpireMode::Always);
        let ttl = db.ttl("k");
        assert!(ttl >= 1 && ttl <= 10, "ttl {}", ttl);
        assert!(db.pttl("k") <= 10_000);

        assert!(db.persist("k"));
        assert_eq!(db.ttl("k"), -1);
        assert!(!db.persist("k"));
    }

    #[test]
    fn lazy_expiration_removes_on_read() {
        let db = Db::new();
        db.set("k", "v".to_string()).unwrap();
        db.expire_key("k", Duration::from_millis(5), ExpireMode::Always);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(db.get("k").unwrap(), None);
        assert_eq!(db.exists(&["k".to_string()]), 0);
        assert_eq!(db.stat(StatField::ExpiredKeys), 1);
    }

    #[test]
    fn sweeper_removes_expired_entries() {
        let db = Arc::new(Db::new());
        db.set("k", "v".to_string()).unwrap();
        db.expire_key("k", Duration::from_millis(1), ExpireMode::Always);
        std::thread::sleep(Duration::from_millis(10));

        let removed = db.sweep_tick();
        assert_eq!(removed, 1);
        assert_eq!(db.type_of("k"), None);
        assert_eq!(db.stat(StatField::ExpiredKeys), 1);
    }

    #[test]
    fn rename_carries_expiration() {
        let db = Db::new();
        db.set("a", "v".to_string()).unwrap();
        db.expire_key("a", Duration::from_secs(50), ExpireMode::Always);

        db.rename("a", "b").unwrap();
        assert_eq!(db.get("b").unwrap(), Some("v".to_string()));
        assert_eq!(db.type_of("a"), None);
        let ttl = db.ttl("b");
        assert!(ttl > 0 && ttl <= 50);
    }

    #[test]
    fn keys_filters_by_pattern() {
        let db = Db::new();
        db.set("user:1", "a".to_string()).unwrap();
        db.set("user:2", "b".to_string()).unwrap();
        db.set("session:1", "c".to_string()).unwrap();

        assert_eq!(db.keys("user:*"), vec!["user:1", "user:2"]);
        assert_eq!(db.keys("*").len(), 3);
    }

    #[test]
    fn scan_pages_through_keyspace() {
        let db = Db::new();
        for i in 0..10 {
            db.set(&format!("k{:02}", i), "v".to_string()).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = db.scan(cursor, None, 3);
            seen.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 10);
    }
}
