//! # Hash Engine
//!
//! Field -> value maps. Wide reads (HGETALL, HKEYS, HVALS) return defensive
//! copies; callers never observe the live body.

use std::collections::HashMap;

use rand::seq::SliceRandom;

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::{paginate, Db};

impl Db {
    /// HSET. Returns the number of newly created fields.
    pub fn hset(&self, key: &str, pairs: &[(String, String)]) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Hash)?;
        let body = self.keyspace.hashes.load_or_store(key, HashMap::new);
        let mut hash = body.write();
        let mut created = 0;
        for (field, value) in pairs {
            if hash.insert(field.clone(), value.clone()).is_none() {
                created += 1;
            }
        }
        drop(hash);
        self.touch_write(key);
        Ok(created)
    }

    /// HSETNX. Returns whether the field was created.
    pub fn hset_nx(&self, key: &str, field: &str, value: &str) -> CacheResult<bool> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Hash)?;
        let body = self.keyspace.hashes.load_or_store(key, HashMap::new);
        let mut hash = body.write();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        drop(hash);
        self.touch_write(key);
        Ok(true)
    }

    pub fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Hash)? {
            return Ok(None);
        }
        Ok(self
            .keyspace
            .hashes
            .load(key)
            .and_then(|body| body.read().get(field).cloned()))
    }

    /// HGETALL as a defensive copy.
    pub fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Hash)? {
            return Ok(HashMap::new());
        }
        Ok(self
            .keyspace
            .hashes
            .load(key)
            .map(|body| body.read().clone())
            .unwrap_or_default())
    }

    /// HDEL. Removes fields and purges the key when the hash empties.
    pub fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Hash)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.hashes.load(key) else {
            return Ok(0);
        };
        let mut hash = body.write();
        let mut removed = 0;
        for field in fields {
            if hash.remove(field).is_some() {
                removed += 1;
            }
        }
        let empty = hash.is_empty();
        drop(hash);

        if removed > 0 {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(removed)
    }

    pub fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
        Ok(self.hget(key, field)?.is_some())
    }

    /// HINCRBY on a 64-bit integer field.
    pub fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Hash)?;
        let body = self.keyspace.hashes.load_or_store(key, HashMap::new);
        let mut hash = body.write();

        let current: i64 = match hash.get(field) {
            Some(text) => text.parse().map_err(|_| CacheError::NotInteger)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(CacheError::Overflow)?;
        hash.insert(field.to_string(), next.to_string());
        drop(hash);
        self.touch_write(key);
        Ok(next)
    }

    pub fn hincr_by_float(&self, key: &str, field: &str, delta: f64) -> CacheResult<f64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Hash)?;
        let body = self.keyspace.hashes.load_or_store(key, HashMap::new);
        let mut hash = body.write();

        let current: f64 = match hash.get(field) {
            Some(text) => text.parse().map_err(|_| CacheError::NotFloat)?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(CacheError::Overflow);
        }
        hash.insert(field.to_string(), ccache_common::format_float(next));
        drop(hash);
        self.touch_write(key);
        Ok(next)
    }

    pub fn hlen(&self, key: &str) -> CacheResult<i64> {
        Ok(self.hgetall(key)?.len() as i64)
    }

    pub fn hkeys(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut fields: Vec<String> = self.hgetall(key)?.into_keys().collect();
        fields.sort();
        Ok(fields)
    }

    pub fn hvals(&self, key: &str) -> CacheResult<Vec<String>> {
        let all = self.hgetall(key)?;
        let mut fields: Vec<&String> = all.keys().collect();
        fields.sort();
        Ok(fields.into_iter().map(|f| all[f].clone()).collect())
    }

    pub fn hmget(&self, key: &str, fields: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Hash)? {
            return Ok(vec![None; fields.len()]);
        }
        let Some(body) = self.keyspace.hashes.load(key) else {
            return Ok(vec![None; fields.len()]);
        };
        let hash = body.read();
        Ok(fields.iter().map(|f| hash.get(f).cloned()).collect())
    }

    /// HRANDFIELD: up to `count` distinct fields, or with duplicates when
    /// `count` arrives negative at the dispatch layer.
    pub fn hrandfield(&self, key: &str, count: usize, distinct: bool) -> CacheResult<Vec<String>> {
        let all = self.hgetall(key)?;
        let mut fields: Vec<String> = all.into_keys().collect();
        let mut rng = rand::thread_rng();
        if distinct {
            fields.shuffle(&mut rng);
            fields.truncate(count);
            Ok(fields)
        } else {
            if fields.is_empty() {
                return Ok(Vec::new());
            }
            Ok((0..count)
                .map(|_| fields.choose(&mut rng).cloned().expect("non-empty"))
                .collect())
        }
    }

    /// HSCAN over fields, sorted for cursor stability.
    pub fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> CacheResult<(u64, Vec<(String, String)>)> {
        let all = self.hgetall(key)?;
        let mut fields: Vec<String> = all
            .keys()
            .filter(|f| pattern.map_or(true, |p| self.patterns.matches(p, f)))
            .cloned()
            .collect();
        fields.sort();
        let (next, page) = paginate(fields, cursor, count);
        let pairs = page
            .into_iter()
            .map(|f| {
                let value = all[&f].clone();
                (f, value)
            })
            .collect();
        Ok((next, pairs))
    }
}
