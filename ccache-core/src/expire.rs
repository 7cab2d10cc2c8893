//! # Expiration Index
//!
//! Purpose: Absolute deadline per key, decoupled from storage. Readers check
//! lazily on access; a background sweeper removes a bounded sample per tick.
//!
//! ## Design Principles
//! 1. **Deadlines, Not Durations**: Entries store a monotonic `Instant`, so
//!    TTL reporting is a subtraction and never drifts with wall-clock jumps.
//! 2. **Lazy First**: Every read path consults `peek`; an observed past
//!    deadline deletes the key before the caller sees it.
//! 3. **Bounded Sweeps**: A tick examines at most a sample of entries so the
//!    sweeper cannot starve foreground operations.

use std::time::{Duration, Instant};

use ahash::RandomState;
use dashmap::DashMap;

/// Condition modes for setting an expiration, mirroring EXPIRE NX/XX/GT/LT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireMode {
    Always,
    /// Only when the key has no expiration.
    Nx,
    /// Only when the key already has one.
    Xx,
    /// Only when the new deadline is later than the current one.
    Gt,
    /// Only when the new deadline is earlier than the current one.
    Lt,
}

pub struct ExpirationIndex {
    deadlines: DashMap<String, Instant, RandomState>,
}

impl ExpirationIndex {
    pub fn new() -> Self {
        ExpirationIndex {
            deadlines: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Applies `deadline` under `mode`. Returns whether the entry changed.
    pub fn set(&self, key: &str, deadline: Instant, mode: ExpireMode) -> bool {
        match mode {
            ExpireMode::Always => {
                self.deadlines.insert(key.to_string(), deadline);
                true
            }
            ExpireMode::Nx => {
                let mut applied = false;
                self.deadlines.entry(key.to_string()).or_insert_with(|| {
                    applied = true;
                    deadline
                });
                applied
            }
            ExpireMode::Xx => match self.deadlines.get_mut(key) {
                Some(mut current) => {
                    *current = deadline;
                    true
                }
                None => false,
            },
            ExpireMode::Gt => match self.deadlines.get_mut(key) {
                Some(mut current) if deadline > *current => {
                    *current = deadline;
                    true
                }
                _ => false,
            },
            ExpireMode::Lt => match self.deadlines.get_mut(key) {
                Some(mut current) if deadline < *current => {
                    *current = deadline;
                    true
                }
                _ => false,
            },
        }
    }

    /// Removes any deadline for `key`. Returns whether one existed.
    pub fn clear(&self, key: &str) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn peek(&self, key: &str) -> Option<Instant> {
        self.deadlines.get(key).map(|entry| *entry)
    }

    /// True when the key carries a deadline at or before `now`.
    pub fn is_due(&self, key: &str, now: Instant) -> bool {
        match self.peek(key) {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }

    /// Remaining lifetime, if an expiration is set and still in the future.
    pub fn remaining(&self, key: &str, now: Instant) -> Option<Duration> {
        self.peek(key)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Examines up to `sample` entries and returns the due keys, removing
    /// them from the index. Iteration order is hash-scrambled, which spreads
    /// successive ticks across the keyspace.
    pub fn sweep(&self, now: Instant, sample: usize) -> Vec<String> {
        let due: Vec<String> = self
            .deadlines
            .iter()
            .take(sample)
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }

    pub fn clear_all(&self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }
}

impl Default for ExpirationIndex {
    fn default() -> Self {
        ExpirationIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_modes_follow_expire_semantics() {
        let index = ExpirationIndex::new();
        let now = Instant::now();
        let near = now + Duration::from_secs(10);
        let far = now + Duration::from_secs(100);

        assert!(!index.set("k", near, ExpireMode::Xx));
        assert!(index.set("k", near, ExpireMode::Nx));
        assert!(!index.set("k", far, ExpireMode::Nx));
        assert_eq!(index.peek("k"), Some(near));

        assert!(index.set("k", far, ExpireMode::Gt));
        assert!(!index.set("k", near, ExpireMode::Gt));
        assert_eq!(index.peek("k"), Some(far));

        assert!(index.set("k", near, ExpireMode::Lt));
        assert!(!index.set("k", far, ExpireMode::Lt));
        assert_eq!(index.peek("k"), Some(near));

        assert!(index.set("k", far, ExpireMode::Always));
        assert_eq!(index.peek("k"), Some(far));
    }

    #[test]
    fn due_and_remaining() {
        let index = ExpirationIndex::new();
        let now = Instant::now();
        index.set("k", now + Duration::from_secs(5), ExpireMode::Always);

        assert!(!index.is_due("k", now));
        assert!(index.is_due("k", now + Duration::from_secs(6)));
        let remaining = index.remaining("k", now).unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(index.remaining("missing", now).is_none());
    }

    #[test]
    fn sweep_removes_only_due_entries() {
        let index = ExpirationIndex::new();
        let now = Instant::now();
        index.set("dead", now - Duration::from_millis(1), ExpireMode::Always);
        index.set("alive", now + Duration::from_secs(60), ExpireMode::Always);

        let due = index.sweep(now, 16);
        assert_eq!(due, vec!["dead".to_string()]);
        assert!(index.peek("dead").is_none());
        assert!(index.peek("alive").is_some());
    }
}
