//! # Version Registry
//!
//! Monotonic counter per key for optimistic concurrency. Every successful
//! mutation bumps the key's version; WATCH captures the value and EXEC
//! compares. Counters outlive key deletion within a process lifetime, so a
//! delete-and-recreate still invalidates stale watches.

use ahash::RandomState;
use dashmap::DashMap;

pub struct VersionRegistry {
    counters: DashMap<String, u64, RandomState>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        VersionRegistry {
            counters: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Atomically increments the key's counter and returns the new value.
    pub fn bump(&self, key: &str) -> u64 {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Current counter value; 0 for keys never mutated.
    pub fn read(&self, key: &str) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for VersionRegistry {
    fn default() -> Self {
        VersionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotonic_from_zero() {
        let versions = VersionRegistry::new();
        assert_eq!(versions.read("k"), 0);
        assert_eq!(versions.bump("k"), 1);
        assert_eq!(versions.bump("k"), 2);
        assert_eq!(versions.read("k"), 2);
        assert_eq!(versions.read("other"), 0);
    }

    #[test]
    fn concurrent_bumps_all_count() {
        let versions = std::sync::Arc::new(VersionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let versions = std::sync::Arc::clone(&versions);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        versions.bump("k");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(versions.read("k"), 800);
    }
}
