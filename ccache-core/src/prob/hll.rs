//! # HyperLogLog
//!
//! Dense HLL with a 64-bit hash: bucket index from the top `p` bits, rho
//! from the leading zeros of the rest. The estimator is the bias-corrected
//! HyperLogLog form with linear counting in the small range.

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::prob::sketch::hash64;

const HLL_HASH_SEED: u64 = 0x484c_4c00;

/// Default precision: p=14 gives 16384 registers and ~0.81% standard error.
pub const DEFAULT_PRECISION: u8 = 14;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hll {
    precision: u8,
    registers: Vec<u8>,
}

impl Default for Hll {
    fn default() -> Self {
        Hll::new(DEFAULT_PRECISION)
    }
}

impl Hll {
    /// Precision must be in [4, 16].
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(4, 16);
        Hll {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    /// Observes one item. Returns true when a register grew (the estimate
    /// may have changed).
    pub fn add(&mut self, data: &[u8]) -> bool {
        let hash = hash64(data, HLL_HASH_SEED);
        let index = (hash >> (64 - self.precision)) as usize;
        let rest = hash << self.precision;
        let rho = if rest == 0 {
            64 - self.precision as u32 + 1
        } else {
            rest.leading_zeros() + 1
        } as u8;

        if rho > self.registers[index] {
            self.registers[index] = rho;
            true
        } else {
            false
        }
    }

    /// Bias-corrected cardinality estimate.
    pub fn count(&self) -> u64 {
        let m = self.registers.len() as f64;
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha(self.registers.len()) * m * m / sum;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            // Linear counting handles the sparse regime better.
            return (m * (m / zeros as f64).ln()).round() as u64;
        }
        raw.round() as u64
    }

    /// Register-wise max merge. Precisions must match.
    pub fn merge(&mut self, other: &Hll) -> CacheResult<()> {
        if self.precision != other.precision {
            return Err(CacheError::other("cannot merge HLLs with different precision"));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

impl Db {
    /// PFADD. Returns true when the estimate may have changed.
    pub fn pfadd(&self, key: &str, items: &[String]) -> CacheResult<bool> {
        self.expire_if_due(key);
        let existed = self.keyspace.check(key, ValueKind::Hll)?;
        self.keyspace.claim(key, ValueKind::Hll)?;
        let body = self.keyspace.hll.load_or_store(key, Hll::default);
        let mut hll = body.write();
        let mut changed = !existed;
        for item in items {
            changed |= hll.add(item.as_bytes());
        }
        drop(hll);
        if changed {
            self.touch_write(key);
        }
        Ok(changed)
    }

    /// PFCOUNT. Multiple keys merge into a scratch HLL first.
    pub fn pfcount(&self, keys: &[String]) -> CacheResult<u64> {
        match keys {
            [] => Ok(0),
            [key] => {
                self.expire_if_due(key);
                if !self.keyspace.check(key, ValueKind::Hll)? {
                    return Ok(0);
                }
                Ok(self
                    .keyspace
                    .hll
                    .load(key)
                    .map(|body| body.read().count())
                    .unwrap_or(0))
            }
            _ => {
                let mut merged = Hll::default();
                for key in keys {
                    self.expire_if_due(key);
                    if !self.keyspace.check(key, ValueKind::Hll)? {
                        continue;
                    }
                    if let Some(body) = self.keyspace.hll.load(key) {
                        merged.merge(&body.read())?;
                    }
                }
                Ok(merged.count())
            }
        }
    }

    /// PFMERGE into `dest`.
    pub fn pfmerge(&self, dest: &str, sources: &[String]) -> CacheResult<()> {
        self.expire_if_due(dest);
        self.keyspace.claim(dest, ValueKind::Hll)?;
        let body = self.keyspace.hll.load_or_store(dest, Hll::default);
        let mut merged = body.read().clone();
        for key in sources {
            self.expire_if_due(key);
            if !self.keyspace.check(key, ValueKind::Hll)? {
                continue;
            }
            if let Some(source) = self.keyspace.hll.load(key) {
                merged.merge(&source.read())?;
            }
        }
        *body.write() = merged;
        self.touch_write(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_cardinalities_are_exact() {
        let mut hll = Hll::default();
        for i in 0..100 {
            hll.add(format!("item-{}", i).as_bytes());
        }
        assert_eq!(hll.count(), 100);
    }

    #[test]
    fn estimate_error_within_two_percent_at_100k() {
        let mut hll = Hll::default();
        for i in 0..100_000u64 {
            hll.add(format!("user:{}", i).as_bytes());
        }
        let estimate = hll.count() as f64;
        let error = (estimate - 100_000.0).abs() / 100_000.0;
        assert!(error < 0.02, "estimate {} error {}", estimate, error);
    }

    #[test]
    fn duplicates_do_not_grow_estimate() {
        let mut hll = Hll::default();
        for _ in 0..1_000 {
            hll.add(b"same");
        }
        assert_eq!(hll.count(), 1);
    }

    #[test]
    fn merge_is_union() {
        let mut a = Hll::default();
        let mut b = Hll::default();
        for i in 0..500 {
            a.add(format!("a-{}", i).as_bytes());
            b.add(format!("b-{}", i).as_bytes());
        }
        // Shared elements.
        for i in 0..500 {
            b.add(format!("a-{}", i).as_bytes());
        }
        a.merge(&b).unwrap();
        let estimate = a.count() as f64;
        assert!((estimate - 1000.0).abs() / 1000.0 < 0.05, "estimate {}", estimate);
    }

    #[test]
    fn pf_commands_roundtrip() {
        let db = Db::new();
        assert!(db
            .pfadd("h1", &["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap());
        assert!(!db.pfadd("h1", &["a".to_string()]).unwrap());
        assert_eq!(db.pfcount(&["h1".to_string()]).unwrap(), 3);

        db.pfadd("h2", &["c".to_string(), "d".to_string()]).unwrap();
        assert_eq!(db.pfcount(&["h1".to_string(), "h2".to_string()]).unwrap(), 4);

        db.pfmerge("dest", &["h1".to_string(), "h2".to_string()]).unwrap();
        assert_eq!(db.pfcount(&["dest".to_string()]).unwrap(), 4);
    }

    #[test]
    fn wrong_type_rejected() {
        let db = Db::new();
        db.set("s", "v".to_string()).unwrap();
        assert!(db.pfadd("s", &["a".to_string()]).is_err());
        assert!(db.pfcount(&["s".to_string()]).is_err());
    }
}
