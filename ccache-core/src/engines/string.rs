//! # String Engine
//!
//! Byte-sequence values with integer and float interpretations for the
//! INCR family. SET overwrites any existing kind and clears the key's
//! expiration, matching the wire semantics.

use std::time::Duration;

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::expire::ExpireMode;

impl Db {
    pub fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Str)? {
            return Ok(None);
        }
        Ok(self
            .keyspace
            .strings
            .load(key)
            .map(|body| body.read().clone()))
    }

    /// Plain SET: replaces any existing value regardless of kind and drops
    /// any expiration.
    pub fn set(&self, key: &str, value: String) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key) != Some(ValueKind::Str) {
            self.keyspace.remove(key);
        }
        self.keyspace.claim(key, ValueKind::Str)?;
        let body = self.keyspace.strings.load_or_store(key, String::new);
        *body.write() = value;
        self.expirations.clear(key);
        self.touch_write(key);
        Ok(())
    }

    /// SETNX. Returns whether the value was stored.
    pub fn set_nx(&self, key: &str, value: String) -> CacheResult<bool> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    /// SETEX: value plus TTL in one step.
    pub fn set_ex(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.set(key, value)?;
        self.expirations
            .set(key, std::time::Instant::now() + ttl, ExpireMode::Always);
        Ok(())
    }

    /// GETSET: stores the new value, returns the old one.
    pub fn get_set(&self, key: &str, value: String) -> CacheResult<Option<String>> {
        let old = self.get(key)?;
        self.set(key, value)?;
        Ok(old)
    }

    /// GETDEL: returns the value and removes the key.
    pub fn get_del(&self, key: &str) -> CacheResult<Option<String>> {
        let old = self.get(key)?;
        if old.is_some() {
            self.del(&[key.to_string()]);
        }
        Ok(old)
    }

    /// APPEND. Returns the new length.
    pub fn append(&self, key: &str, suffix: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Str)?;
        let body = self.keyspace.strings.load_or_store(key, String::new);
        let mut value = body.write();
        value.push_str(suffix);
        let len = value.len() as i64;
        drop(value);
        self.touch_write(key);
        Ok(len)
    }

    pub fn strlen(&self, key: &str) -> CacheResult<i64> {
        Ok(self.get(key)?.map(|v| v.len() as i64).unwrap_or(0))
    }

    /// GETRANGE over bytes with negative-from-tail indices.
    pub fn get_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<String> {
        let Some(value) = self.get(key)? else {
            return Ok(String::new());
        };
        let bytes = value.as_bytes();
        match super::clip_range(start, stop, bytes.len()) {
            Some((lo, hi)) => Ok(String::from_utf8_lossy(&bytes[lo..=hi]).into_owned()),
            None => Ok(String::new()),
        }
    }

    /// SETRANGE: overwrites bytes at `offset`, zero-padding any gap.
    /// Returns the new length.
    pub fn set_range(&self, key: &str, offset: usize, patch: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Str)?;
        let body = self.keyspace.strings.load_or_store(key, String::new);
        let mut value = body.write();

        let mut bytes = value.as_bytes().to_vec();
        let end = offset + patch.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(patch.as_bytes());
        *value = String::from_utf8_lossy(&bytes).into_owned();
        let len = value.len() as i64;
        drop(value);
        self.touch_write(key);
        Ok(len)
    }

    pub fn incr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, -1)
    }

    /// INCRBY / DECRBY. The stored value must be a decimal integer string;
    /// overflow fails without mutating.
    pub fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Str)?;
        let body = self.keyspace.strings.load_or_store(key, String::new);
        let mut value = body.write();

        let current: i64 = if value.is_empty() {
            0
        } else {
            value.parse().map_err(|_| CacheError::NotInteger)?
        };
        let next = current.checked_add(delta).ok_or(CacheError::Overflow)?;
        *value = next.to_string();
        drop(value);
        self.touch_write(key);
        Ok(next)
    }

    /// INCRBYFLOAT with IEEE-754 doubles; the result must stay finite.
    pub fn incr_by_float(&self, key: &str, delta: f64) -> CacheResult<f64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Str)?;
        let body = self.keyspace.strings.load_or_store(key, String::new);
        let mut value = body.write();

        let current: f64 = if value.is_empty() {
            0.0
        } else {
            value.parse().map_err(|_| CacheError::NotFloat)?
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(CacheError::Overflow);
        }
        *value = ccache_common::format_float(next);
        drop(value);
        self.touch_write(key);
        Ok(next)
    }

    /// MGET: type-mismatched or missing keys yield None.
    pub fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        keys.iter()
            .map(|key| self.get(key).unwrap_or(None))
            .collect()
    }

    pub fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()> {
        for (key, value) in pairs {
            self.set(key, value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let db = Db::new();
        db.set("k", "value".to_string()).unwrap();
        assert_eq!(db.get("k").unwrap(), Some("value".to_string()));
        assert_eq!(db.get("missing").unwrap(), None);
    }

    #[test]
    fn set_overwrites_other_kinds_and_clears_ttl() {
        let db = Db::new();
        db.lpush("k", &["x".to_string()]).unwrap();
        db.set("k", "v".to_string()).unwrap();
        assert_eq!(db.type_of("k"), Some(ValueKind::Str));

        db.expire_key("k", Duration::from_secs(100), ExpireMode::Always);
        db.set("k", "w".to_string()).unwrap();
        assert_eq!(db.ttl("k"), -1);
    }

    #[test]
    fn incr_requires_integer_strings() {
        let db = Db::new();
        assert_eq!(db.incr("n").unwrap(), 1);
        assert_eq!(db.incr_by("n", 9).unwrap(), 10);
        assert_eq!(db.decr("n").unwrap(), 9);

        db.set("s", "abc".to_string()).unwrap();
        assert_eq!(db.incr("s"), Err(CacheError::NotInteger));

        db.set("max", i64::MAX.to_string()).unwrap();
        assert_eq!(db.incr("max"), Err(CacheError::Overflow));
        // Failed increment must not mutate.
        assert_eq!(db.get("max").unwrap(), Some(i64::MAX.to_string()));
    }

    #[test]
    fn incr_by_float_formats_like_redis() {
        let db = Db::new();
        assert_eq!(db.incr_by_float("f", 10.5).unwrap(), 10.5);
        assert_eq!(db.get("f").unwrap(), Some("10.5".to_string()));
        assert_eq!(db.incr_by_float("f", 0.1).unwrap(), 10.6);

        db.set("s", "abc".to_string()).unwrap();
        assert_eq!(db.incr_by_float("s", 1.0), Err(CacheError::NotFloat));
    }

    #[test]
    fn append_strlen_getrange() {
        let db = Db::new();
        assert_eq!(db.append("k", "Hello ").unwrap(), 6);
        assert_eq!(db.append("k", "World").unwrap(), 11);
        assert_eq!(db.strlen("k").unwrap(), 11);

        assert_eq!(db.get_range("k", 0, 4).unwrap(), "Hello");
        assert_eq!(db.get_range("k", -5, -1).unwrap(), "World");
        assert_eq!(db.get_range("k", 0, -1).unwrap(), "Hello World");
        assert_eq!(db.get_range("k", 20, 30).unwrap(), "");
        assert_eq!(db.get_range("missing", 0, -1).unwrap(), "");
    }

    #[test]
    fn setrange_zero_pads() {
        let db = Db::new();
        db.set_range("k", 5, "x").unwrap();
        let stored = db.get("k").unwrap().unwrap();
        assert_eq!(stored.len(), 6);
        assert!(stored.ends_with('x'));

        db.set("h", "Hello World".to_string()).unwrap();
        assert_eq!(db.set_range("h", 6, "Redis").unwrap(), 11);
        assert_eq!(db.get("h").unwrap(), Some("Hello Redis".to_string()));
    }

    #[test]
    fn getset_getdel_setnx() {
        let db = Db::new();
        assert_eq!(db.get_set("k", "new".to_string()).unwrap(), None);
        assert_eq!(
            db.get_set("k", "newer".to_string()).unwrap(),
            Some("new".to_string())
        );

        assert!(!db.set_nx("k", "other".to_string()).unwrap());
        assert!(db.set_nx("fresh", "v".to_string()).unwrap());

        assert_eq!(db.get_del("k").unwrap(), Some("newer".to_string()));
        assert_eq!(db.get("k").unwrap(), None);
    }

    #[test]
    fn mset_mget() {
        let db = Db::new();
        db.mset(&[
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ])
        .unwrap();
        db.lpush("l", &["x".to_string()]).unwrap();

        assert_eq!(
            db.mget(&["a".to_string(), "missing".to_string(), "l".to_string(), "b".to_string()]),
            vec![Some("1".to_string()), None, None, Some("2".to_string())]
        );
    }

    #[test]
    fn setex_attaches_ttl() {
        let db = Db::new();
        db.set_ex("k", "v".to_string(), Duration::from_secs(30)).unwrap();
        let ttl = db.ttl("k");
        assert!(ttl > 0 && ttl <= 30);
    }
}
