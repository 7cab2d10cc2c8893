//! # Count-Min Sketch
//!
//! `depth x width` matrix of 64-bit counters. Point increments touch one
//! cell per row; queries take the minimum across rows, so estimates only
//! ever overcount. Merging requires matching dimensions.

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::prob::sketch::hash64;

const ROW_SEED: u64 = 0xc3_50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<u64>,
    total: u64,
}

impl CountMinSketch {
    pub fn by_dim(width: usize, depth: usize) -> CacheResult<Self> {
        if width == 0 || depth == 0 {
            return Err(CacheError::other("width and depth must be positive"));
        }
        Ok(CountMinSketch {
            width,
            depth,
            counters: vec![0; width * depth],
            total: 0,
        })
    }

    /// `w = ceil(e / epsilon)`, `d = ceil(ln(1 / delta))`.
    pub fn by_prob(epsilon: f64, delta: f64) -> CacheResult<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) || !(delta > 0.0 && delta < 1.0) {
            return Err(CacheError::BadErrorRate);
        }
        let width = (std::f64::consts::E / epsilon).ceil() as usize;
        let depth = (1.0 / delta).ln().ceil().max(1.0) as usize;
        Self::by_dim(width, depth)
    }

    fn cell(&self, row: usize, data: &[u8]) -> usize {
        let column = (hash64(data, ROW_SEED + row as u64) as usize) % self.width;
        row * self.width + column
    }

    /// Adds `n` to the item's cell in every row; returns the new estimate.
    pub fn increment(&mut self, data: &[u8], n: u64) -> u64 {
        let mut estimate = u64::MAX;
        for row in 0..self.depth {
            let cell = self.cell(row, data);
            self.counters[cell] = self.counters[cell].saturating_add(n);
            estimate = estimate.min(self.counters[cell]);
        }
        self.total = self.total.saturating_add(n);
        estimate
    }

    /// Minimum across rows; never undercounts the true frequency.
    pub fn query(&self, data: &[u8]) -> u64 {
        (0..self.depth)
            .map(|row| self.counters[self.cell(row, data)])
            .min()
            .unwrap_or(0)
    }

    /// Accumulates weighted source counters into self. Dimensions must
    /// match exactly.
    pub fn merge_from(&mut self, source: &CountMinSketch, weight: u64) -> CacheResult<()> {
        if source.width != self.width || source.depth != self.depth {
            return Err(CacheError::other("width/depth is not equal"));
        }
        for (mine, theirs) in self.counters.iter_mut().zip(&source.counters) {
            *mine = mine.saturating_add(theirs.saturating_mul(weight));
        }
        self.total = self.total.saturating_add(source.total.saturating_mul(weight));
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Db {
    /// CMS.INITBYDIM.
    pub fn cms_init_by_dim(&self, key: &str, width: usize, depth: usize) -> CacheResult<()> {
        self.cms_init(key, CountMinSketch::by_dim(width, depth)?)
    }

    /// CMS.INITBYPROB.
    pub fn cms_init_by_prob(&self, key: &str, epsilon: f64, delta: f64) -> CacheResult<()> {
        self.cms_init(key, CountMinSketch::by_prob(epsilon, delta)?)
    }

    fn cms_init(&self, key: &str, sketch: CountMinSketch) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Err(CacheError::other("key already exists"));
        }
        self.keyspace.claim(key, ValueKind::Cms)?;
        self.keyspace.cms.load_or_store(key, move || sketch);
        self.touch_write(key);
        Ok(())
    }

    /// CMS.INCRBY. Returns the new estimate per item.
    pub fn cms_incrby(&self, key: &str, items: &[(String, u64)]) -> CacheResult<Vec<u64>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cms)? {
            return Err(CacheError::other("key does not exist"));
        }
        let body = self.keyspace.cms.load(key).ok_or(CacheError::NoSuchKey)?;
        let mut sketch = body.write();
        let estimates = items
            .iter()
            .map(|(item, n)| sketch.increment(item.as_bytes(), *n))
            .collect();
        drop(sketch);
        self.touch_write(key);
        Ok(estimates)
    }

    /// CMS.QUERY.
    pub fn cms_query(&self, key: &str, items: &[String]) -> CacheResult<Vec<u64>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cms)? {
            return Err(CacheError::other("key does not exist"));
        }
        let body = self.keyspace.cms.load(key).ok_or(CacheError::NoSuchKey)?;
        let sketch = body.read();
        Ok(items.iter().map(|i| sketch.query(i.as_bytes())).collect())
    }

    /// CMS.MERGE: dest accumulates weighted sources. The destination must
    /// already exist with matching dimensions.
    pub fn cms_merge(
        &self,
        dest: &str,
        sources: &[String],
        weights: Option<&[u64]>,
    ) -> CacheResult<()> {
        let weights = match weights {
            None => vec![1; sources.len()],
            Some(w) if w.len() == sources.len() => w.to_vec(),
            Some(_) => return Err(CacheError::Syntax),
        };

        self.expire_if_due(dest);
        if !self.keyspace.check(dest, ValueKind::Cms)? {
            return Err(CacheError::other("key does not exist"));
        }
        let dest_body = self.keyspace.cms.load(dest).ok_or(CacheError::NoSuchKey)?;

        // Clone sources first so no two body locks are held at once.
        let mut cloned = Vec::with_capacity(sources.len());
        for key in sources {
            self.expire_if_due(key);
            if !self.keyspace.check(key, ValueKind::Cms)? {
                return Err(CacheError::other("key does not exist"));
            }
            let body = self.keyspace.cms.load(key).ok_or(CacheError::NoSuchKey)?;
            cloned.push(body.read().clone());
        }

        let mut sketch = dest_body.write();
        for (source, weight) in cloned.iter().zip(weights) {
            sketch.merge_from(source, weight)?;
        }
        drop(sketch);
        self.touch_write(dest);
        Ok(())
    }

    /// CMS.INFO: (width, depth, total count).
    pub fn cms_info(&self, key: &str) -> CacheResult<(usize, usize, u64)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cms)? {
            return Err(CacheError::other("key does not exist"));
        }
        let body = self.keyspace.cms.load(key).ok_or(CacheError::NoSuchKey)?;
        let sketch = body.read();
        Ok((sketch.width(), sketch.depth(), sketch.total()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_from_probabilities() {
        let sketch = CountMinSketch::by_prob(0.001, 0.01).unwrap();
        assert_eq!(sketch.width(), 2719);
        assert_eq!(sketch.depth(), 5);

        assert!(CountMinSketch::by_prob(0.0, 0.01).is_err());
        assert!(CountMinSketch::by_dim(0, 5).is_err());
    }

    #[test]
    fn query_never_undercounts() {
        let mut sketch = CountMinSketch::by_prob(0.01, 0.01).unwrap();
        for i in 0..1_000u32 {
            sketch.increment(format!("item-{}", i % 50).as_bytes(), 1);
        }
        // Every item was inserted 20 times; estimates are >= 20.
        for i in 0..50 {
            assert!(sketch.query(format!("item-{}", i).as_bytes()) >= 20);
        }
    }

    #[test]
    fn error_bounded_by_epsilon_total() {
        let mut sketch = CountMinSketch::by_prob(0.01, 0.001).unwrap();
        for i in 0..10_000u32 {
            sketch.increment(format!("item-{}", i).as_bytes(), 1);
        }
        let bound = (0.01 * sketch.total() as f64) as u64;
        let estimate = sketch.query(b"item-0");
        assert!(estimate >= 1 && estimate <= 1 + bound, "estimate {}", estimate);
    }

    #[test]
    fn weighted_merge_accumulates() {
        let mut a = CountMinSketch::by_dim(100, 4).unwrap();
        let mut b = CountMinSketch::by_dim(100, 4).unwrap();
        a.increment(b"x", 3);
        b.increment(b"x", 5);

        a.merge_from(&b, 2).unwrap();
        assert_eq!(a.query(b"x"), 13);
        assert_eq!(a.total(), 13);

        let mismatched = CountMinSketch::by_dim(50, 4).unwrap();
        assert!(a.merge_from(&mismatched, 1).is_err());
    }

    #[test]
    fn cms_commands_roundtrip() {
        let db = Db::new();
        db.cms_init_by_dim("c", 200, 5).unwrap();
        assert!(db.cms_init_by_dim("c", 200, 5).is_err());

        let estimates = db
            .cms_incrby("c", &[("a".to_string(), 3), ("b".to_string(), 2)])
            .unwrap();
        assert_eq!(estimates, vec![3, 2]);
        assert_eq!(db.cms_query("c", &["a".to_string()]).unwrap(), vec![3]);

        db.cms_init_by_dim("c2", 200, 5).unwrap();
        db.cms_incrby("c2", &[("a".to_string(), 1)]).unwrap();
        db.cms_merge("c", &["c2".to_string()], Some(&[10])).unwrap();
        assert_eq!(db.cms_query("c", &["a".to_string()]).unwrap(), vec![13]);

        let (width, depth, total) = db.cms_info("c").unwrap();
        assert_eq!((width, depth), (200, 5));
        assert_eq!(total, 15);

        assert!(db.cms_query("missing", &["a".to_string()]).is_err());
    }
}
