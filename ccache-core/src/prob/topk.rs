//! # Top-K
//!
//! Heavy-keeper sketch: a fingerprint/counter matrix with probabilistic
//! decay on collisions, plus the tracked top-k list. Decay makes the
//! structure forgetful, so yesterday's heavy hitters fade once traffic
//! moves on.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::prob::sketch::hash64;

const FP_SEED: u64 = 0x70_4b_01;
const ROW_SEED: u64 = 0x70_4b_02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Bucket {
    fingerprint: u64,
    count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopK {
    k: usize,
    width: usize,
    depth: usize,
    decay: f64,
    buckets: Vec<Bucket>,
    /// Tracked heavy hitters: item -> estimated count.
    tracked: HashMap<String, u64>,
}

impl TopK {
    pub fn new(k: usize, width: usize, depth: usize, decay: f64) -> CacheResult<Self> {
        if k == 0 || width == 0 || depth == 0 {
            return Err(CacheError::other("k, width and depth must be positive"));
        }
        if !(0.0..=1.0).contains(&decay) {
            return Err(CacheError::other("decay should be between 0 and 1"));
        }
        Ok(TopK {
            k,
            width,
            depth,
            decay,
            buckets: vec![Bucket::default(); width * depth],
            tracked: HashMap::new(),
        })
    }

    /// Adds `count` observations of `item`. Returns whether the item sits
    /// in the top-k afterwards.
    pub fn incr(&mut self, item: &str, count: u64) -> bool {
        let fingerprint = hash64(item.as_bytes(), FP_SEED);
        let mut estimate = 0u64;

        for row in 0..self.depth {
            let column = (hash64(item.as_bytes(), ROW_SEED + row as u64) as usize) % self.width;
            let bucket = &mut self.buckets[row * self.width + column];

            if bucket.count == 0 || bucket.fingerprint == fingerprint {
                bucket.fingerprint = fingerprint;
                bucket.count += count;
                estimate = estimate.max(bucket.count);
                continue;
            }

            // Collision: decay the resident counter, one observation at a
            // time; on reaching zero the slot changes owner.
            let mut remaining = count;
            let mut rng = rand::thread_rng();
            while remaining > 0 && bucket.count > 0 {
                let p = self.decay.powi(bucket.count.min(1_000) as i32);
                if rng.gen_bool(p.clamp(0.0, 1.0)) {
                    bucket.count -= 1;
                }
                remaining -= 1;
            }
            if bucket.count == 0 && remaining > 0 {
                bucket.fingerprint = fingerprint;
                bucket.count = remaining;
                estimate = estimate.max(bucket.count);
            }
        }

        if estimate > 0 {
            self.offer(item, estimate);
        }
        self.tracked.contains_key(item)
    }

    /// Installs the estimate into the tracked list, evicting the smallest
    /// entry when the list is over capacity.
    fn offer(&mut self, item: &str, estimate: u64) {
        let entry = self.tracked.entry(item.to_string()).or_insert(0);
        *entry = (*entry).max(estimate);

        if self.tracked.len() > self.k {
            if let Some(loser) = self
                .tracked
                .iter()
                .min_by_key(|(name, count)| (**count, std::cmp::Reverse(name.clone())))
                .map(|(name, _)| name.clone())
            {
                self.tracked.remove(&loser);
            }
        }
    }

    /// Whether the item is currently in the top-k list.
    pub fn query(&self, item: &str) -> bool {
        self.tracked.contains_key(item)
    }

    /// Sketch estimate for the item (0 when fully decayed).
    pub fn count(&self, item: &str) -> u64 {
        let fingerprint = hash64(item.as_bytes(), FP_SEED);
        (0..self.depth)
            .map(|row| {
                let column =
                    (hash64(item.as_bytes(), ROW_SEED + row as u64) as usize) % self.width;
                let bucket = &self.buckets[row * self.width + column];
                if bucket.fingerprint == fingerprint {
                    bucket.count
                } else {
                    0
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Current top-k members with counts, descending.
    pub fn list(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .tracked
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dims(&self) -> (usize, usize, f64) {
        (self.width, self.depth, self.decay)
    }
}

impl Db {
    /// TOPK.RESERVE.
    pub fn topk_reserve(
        &self,
        key: &str,
        k: usize,
        width: usize,
        depth: usize,
        decay: f64,
    ) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Err(CacheError::other("key already exists"));
        }
        let sketch = TopK::new(k, width, depth, decay)?;
        self.keyspace.claim(key, ValueKind::TopK)?;
        self.keyspace.topk.load_or_store(key, move || sketch);
        self.touch_write(key);
        Ok(())
    }

    /// TOPK.ADD: per item, whether it landed in (or stayed in) the top-k.
    pub fn topk_add(&self, key: &str, items: &[String]) -> CacheResult<Vec<bool>> {
        let body = self.topk_body(key)?;
        let mut sketch = body.write();
        let results = items.iter().map(|item| sketch.incr(item, 1)).collect();
        drop(sketch);
        self.touch_write(key);
        Ok(results)
    }

    /// TOPK.INCRBY.
    pub fn topk_incrby(&self, key: &str, items: &[(String, u64)]) -> CacheResult<Vec<bool>> {
        let body = self.topk_body(key)?;
        let mut sketch = body.write();
        let results = items
            .iter()
            .map(|(item, count)| sketch.incr(item, *count))
            .collect();
        drop(sketch);
        self.touch_write(key);
        Ok(results)
    }

    /// TOPK.QUERY: membership in the current top-k.
    pub fn topk_query(&self, key: &str, items: &[String]) -> CacheResult<Vec<bool>> {
        let body = self.topk_body(key)?;
        let sketch = body.read();
        Ok(items.iter().map(|item| sketch.query(item)).collect())
    }

    /// TOPK.COUNT: sketch estimates.
    pub fn topk_count(&self, key: &str, items: &[String]) -> CacheResult<Vec<u64>> {
        let body = self.topk_body(key)?;
        let sketch = body.read();
        Ok(items.iter().map(|item| sketch.count(item)).collect())
    }

    /// TOPK.LIST.
    pub fn topk_list(&self, key: &str) -> CacheResult<Vec<(String, u64)>> {
        Ok(self.topk_body(key)?.read().list())
    }

    /// TOPK.INFO: (k, width, depth, decay).
    pub fn topk_info(&self, key: &str) -> CacheResult<(usize, usize, usize, f64)> {
        let body = self.topk_body(key)?;
        let sketch = body.read();
        let (width, depth, decay) = sketch.dims();
        Ok((sketch.k(), width, depth, decay))
    }

    fn topk_body(&self, key: &str) -> CacheResult<crate::shard::Body<TopK>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::TopK)? {
            return Err(CacheError::other("key does not exist"));
        }
        self.keyspace.topk.load(key).ok_or(CacheError::NoSuchKey)
    }
}
