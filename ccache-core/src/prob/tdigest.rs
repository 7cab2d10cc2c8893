//! # T-Digest
//!
//! Merging t-digest: observations buffer until a threshold, then merge
//! into centroids under the `4·N·q(1-q)/δ` size bound. Quantile and CDF
//! queries interpolate between centroid means, so accuracy is highest at
//! the tails.

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

/// Default compression parameter.
pub const DEFAULT_COMPRESSION: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub mean: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TDigest {
    compression: f64,
    /// Sorted by mean.
    centroids: Vec<Centroid>,
    buffer: Vec<Centroid>,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        TDigest::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    pub fn new(compression: f64) -> Self {
        TDigest {
            compression: compression.max(10.0),
            centroids: Vec::new(),
            buffer: Vec::new(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn buffer_limit(&self) -> usize {
        (self.compression * 8.0) as usize
    }

    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1.0);
    }

    fn add_weighted(&mut self, value: f64, weight: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(Centroid {
            mean: value,
            weight,
        });
        if self.buffer.len() >= self.buffer_limit() {
            self.compress();
        }
    }

    /// Folds the buffer into the centroid list under the size bound.
    fn compress(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut points = std::mem::take(&mut self.centroids);
        points.append(&mut self.buffer);
        points.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total: f64 = points.iter().map(|c| c.weight).sum();
        let mut merged: Vec<Centroid> = Vec::new();
        let mut seen = 0.0;
        let mut current = points[0];

        for point in points.into_iter().skip(1) {
            let candidate = current.weight + point.weight;
            let q = (seen + candidate / 2.0) / total;
            let limit = 4.0 * total * q * (1.0 - q) / self.compression;
            if candidate <= limit.max(1.0) {
                current.mean = (current.mean * current.weight + point.mean * point.weight)
                    / candidate;
                current.weight = candidate;
            } else {
                seen += current.weight;
                merged.push(current);
                current = point;
            }
        }
        merged.push(current);
        self.centroids = merged;
    }

    /// Centroid view including any buffered points, sorted by mean.
    fn merged_view(&self) -> Vec<Centroid> {
        let mut view = self.centroids.clone();
        view.extend(&self.buffer);
        view.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        view
    }

    pub fn count(&self) -> f64 {
        self.centroids.iter().chain(&self.buffer).map(|c| c.weight).sum()
    }

    pub fn min(&self) -> Option<f64> {
        (self.count() > 0.0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count() > 0.0).then_some(self.max)
    }

    pub fn compression(&self) -> f64 {
        self.compression
    }

    pub fn centroid_count(&self) -> usize {
        self.centroids.len() + self.buffer.len()
    }

    /// Interpolated quantile, `q` in [0, 1]. None when empty.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let view = self.merged_view();
        let total: f64 = view.iter().map(|c| c.weight).sum();
        if total == 0.0 {
            return None;
        }
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }

        let target = q * total;
        let mut cum = 0.0;
        let mut prev_mid = 0.0;
        let mut prev_mean = self.min;
        for centroid in &view {
            let mid = cum + centroid.weight / 2.0;
            if target < mid {
                let span = mid - prev_mid;
                let fraction = if span > 0.0 { (target - prev_mid) / span } else { 0.0 };
                return Some(prev_mean + fraction * (centroid.mean - prev_mean));
            }
            cum += centroid.weight;
            prev_mid = mid;
            prev_mean = centroid.mean;
        }
        Some(self.max)
    }

    /// Fraction of observed weight at or below `x`. None when empty.
    pub fn cdf(&self, x: f64) -> Option<f64> {
        let view = self.merged_view();
        let total: f64 = view.iter().map(|c| c.weight).sum();
        if total == 0.0 {
            return None;
        }
        if x < self.min {
            return Some(0.0);
        }
        if x >= self.max {
            return Some(1.0);
        }

        let mut cum = 0.0;
        for (i, centroid) in view.iter().enumerate() {
            if x < centroid.mean {
                let prev_mean = if i == 0 { self.min } else { view[i - 1].mean };
                let prev_cum = cum - if i == 0 { 0.0 } else { view[i - 1].weight / 2.0 };
                let mid = cum + centroid.weight / 2.0;
                let span = centroid.mean - prev_mean;
                let fraction = if span > 0.0 { (x - prev_mean) / span } else { 1.0 };
                let interpolated = prev_cum + fraction * (mid - prev_cum);
                return Some((interpolated / total).clamp(0.0, 1.0));
            }
            cum += centroid.weight;
        }
        Some(1.0)
    }

    /// Mean of the observations between the `q_lo` and `q_hi` quantiles.
    pub fn trimmed_mean(&self, q_lo: f64, q_hi: f64) -> Option<f64> {
        let view = self.merged_view();
        let total: f64 = view.iter().map(|c| c.weight).sum();
        if total == 0.0 || q_lo >= q_hi {
            return None;
        }
        let lo = q_lo.clamp(0.0, 1.0) * total;
        let hi = q_hi.clamp(0.0, 1.0) * total;

        let mut cum = 0.0;
        let mut sum = 0.0;
        let mut weight = 0.0;
        for centroid in &view {
            let start = cum;
            let end = cum + centroid.weight;
            let overlap = end.min(hi) - start.max(lo);
            if overlap > 0.0 {
                sum += centroid.mean * overlap;
                weight += overlap;
            }
            cum = end;
        }
        (weight > 0.0).then(|| sum / weight)
    }

    /// Folds another digest into this one.
    pub fn merge(&mut self, other: &TDigest) {
        for centroid in other.merged_view() {
            self.min = self.min.min(centroid.mean);
            self.max = self.max.max(centroid.mean);
            self.buffer.push(centroid);
            if self.buffer.len() >= self.buffer_limit() {
                self.compress();
            }
        }
    }

    pub fn reset(&mut self) {
        self.centroids.clear();
        self.buffer.clear();
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }
}

impl Db {
    /// TDIGEST.CREATE. Errors when the key exists.
    pub fn tdigest_create(&self, key: &str, compression: Option<f64>) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Err(CacheError::other("key already exists"));
        }
        let digest = TDigest::new(compression.unwrap_or(DEFAULT_COMPRESSION));
        self.keyspace.claim(key, ValueKind::TDigest)?;
        self.keyspace.tdigest.load_or_store(key, move || digest);
        self.touch_write(key);
        Ok(())
    }

    /// TDIGEST.ADD. Creates a default digest on demand.
    pub fn tdigest_add(&self, key: &str, values: &[f64]) -> CacheResult<()> {
        if values.iter().any(|v| v.is_nan()) {
            return Err(CacheError::NotFloat);
        }
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::TDigest)?;
        let body = self.keyspace.tdigest.load_or_store(key, TDigest::default);
        let mut digest = body.write();
        for value in values {
            digest.add(*value);
        }
        drop(digest);
        self.touch_write(key);
        Ok(())
    }

    /// TDIGEST.MERGE into `dest`, creating it with the default compression
    /// when absent.
    pub fn tdigest_merge(&self, dest: &str, sources: &[String]) -> CacheResult<()> {
        self.expire_if_due(dest);
        self.keyspace.claim(dest, ValueKind::TDigest)?;
        let dest_body = self.keyspace.tdigest.load_or_store(dest, TDigest::default);

        let mut cloned = Vec::with_capacity(sources.len());
        for key in sources {
            self.expire_if_due(key);
            if !self.keyspace.check(key, ValueKind::TDigest)? {
                return Err(CacheError::other("key does not exist"));
            }
            let body = self
                .keyspace
                .tdigest
                .load(key)
                .ok_or(CacheError::NoSuchKey)?;
            cloned.push(body.read().clone());
        }

        let mut digest = dest_body.write();
        for source in &cloned {
            digest.merge(source);
        }
        drop(digest);
        self.touch_write(dest);
        Ok(())
    }

    /// TDIGEST.QUANTILE: one result per requested quantile; NaN when empty.
    pub fn tdigest_quantile(&self, key: &str, quantiles: &[f64]) -> CacheResult<Vec<f64>> {
        let body = self.tdigest_body(key)?;
        let digest = body.read();
        Ok(quantiles
            .iter()
            .map(|q| digest.quantile(*q).unwrap_or(f64::NAN))
            .collect())
    }

    /// TDIGEST.CDF: one result per value; NaN when empty.
    pub fn tdigest_cdf(&self, key: &str, values: &[f64]) -> CacheResult<Vec<f64>> {
        let body = self.tdigest_body(key)?;
        let digest = body.read();
        Ok(values
            .iter()
            .map(|x| digest.cdf(*x).unwrap_or(f64::NAN))
            .collect())
    }

    pub fn tdigest_min(&self, key: &str) -> CacheResult<Option<f64>> {
        Ok(self.tdigest_body(key)?.read().min())
    }

    pub fn tdigest_max(&self, key: &str) -> CacheResult<Option<f64>> {
        Ok(self.tdigest_body(key)?.read().max())
    }

    pub fn tdigest_trimmed_mean(
        &self,
        key: &str,
        q_lo: f64,
        q_hi: f64,
    ) -> CacheResult<Option<f64>> {
        Ok(self.tdigest_body(key)?.read().trimmed_mean(q_lo, q_hi))
    }

    pub fn tdigest_reset(&self, key: &str) -> CacheResult<()> {
        let body = self.tdigest_body(key)?;
        body.write().reset();
        self.touch_write(key);
        Ok(())
    }

    /// TDIGEST.INFO: (compression, centroid count, observation count).
    pub fn tdigest_info(&self, key: &str) -> CacheResult<(f64, usize, u64)> {
        let body = self.tdigest_body(key)?;
        let digest = body.read();
        Ok((
            digest.compression(),
            digest.centroid_count(),
            digest.count() as u64,
        ))
    }

    fn tdigest_body(&self, key: &str) -> CacheResult<crate::shard::Body<TDigest>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::TDigest)? {
            return Err(CacheError::other("key does not exist"));
        }
        self.keyspace
            .tdigest
            .load(key)
            .ok_or(CacheError::NoSuchKey)
    }
}
