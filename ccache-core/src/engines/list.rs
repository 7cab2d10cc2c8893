//! # List Engine
//!
//! Ordered string sequences over `VecDeque`: head/tail push-pop, indexed
//! access, range trimming, and matched removal. Empty lists purge the key.

use std::collections::VecDeque;

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

/// LINSERT placement relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertWhere {
    Before,
    After,
}

impl Db {
    /// LPUSH. Values are pushed one by one, so the last argument ends up at
    /// the head. Returns the new length.
    pub fn lpush(&self, key: &str, values: &[String]) -> CacheResult<i64> {
        self.push(key, values, true, false)
    }

    pub fn rpush(&self, key: &str, values: &[String]) -> CacheResult<i64> {
        self.push(key, values, false, false)
    }

    /// LPUSHX: pushes only when the list already exists.
    pub fn lpushx(&self, key: &str, values: &[String]) -> CacheResult<i64> {
        self.push(key, values, true, true)
    }

    pub fn rpushx(&self, key: &str, values: &[String]) -> CacheResult<i64> {
        self.push(key, values, false, true)
    }

    fn push(&self, key: &str, values: &[String], head: bool, require: bool) -> CacheResult<i64> {
        self.expire_if_due(key);
        if require && !self.keyspace.check(key, ValueKind::List)? {
            return Ok(0);
        }
        self.keyspace.claim(key, ValueKind::List)?;
        let body = self.keyspace.lists.load_or_store(key, VecDeque::new);
        let mut list = body.write();
        for value in values {
            if head {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        let len = list.len() as i64;
        drop(list);
        self.touch_write(key);
        Ok(len)
    }

    /// LPOP with count. Returns the popped values in pop order.
    pub fn lpop(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        self.pop(key, count, true)
    }

    pub fn rpop(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        self.pop(key, count, false)
    }

    fn pop(&self, key: &str, count: usize, head: bool) -> CacheResult<Vec<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(Vec::new());
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(Vec::new());
        };
        let mut list = body.write();
        let mut popped = Vec::with_capacity(count.min(list.len()));
        for _ in 0..count {
            let value = if head { list.pop_front() } else { list.pop_back() };
            match value {
                Some(v) => popped.push(v),
                None => break,
            }
        }
        let empty = list.is_empty();
        drop(list);

        if !popped.is_empty() {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(popped)
    }

    /// LRANGE with inclusive, clipped, negative-from-tail indices.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(Vec::new());
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(Vec::new());
        };
        let list = body.read();
        match super::clip_range(start, stop, list.len()) {
            Some((lo, hi)) => Ok(list.iter().skip(lo).take(hi - lo + 1).cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn lindex(&self, key: &str, index: i64) -> CacheResult<Option<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(None);
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(None);
        };
        let list = body.read();
        let Some(idx) = resolve_index(index, list.len()) else {
            return Ok(None);
        };
        Ok(list.get(idx).cloned())
    }

    /// LSET. Errors when the key is missing or the index is out of range.
    pub fn lset(&self, key: &str, index: i64, value: String) -> CacheResult<()> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self.keyspace.lists.load(key).ok_or(CacheError::NoSuchKey)?;
        let mut list = body.write();
        let idx = resolve_index(index, list.len()).ok_or(CacheError::IndexOutOfRange)?;
        list[idx] = value;
        drop(list);
        self.touch_write(key);
        Ok(())
    }

    /// LINSERT. Returns the new length, -1 when the pivot was not found, or
    /// 0 when the key does not exist.
    pub fn linsert(
        &self,
        key: &str,
        place: InsertWhere,
        pivot: &str,
        value: String,
    ) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(0);
        };
        let mut list = body.write();
        let Some(pos) = list.iter().position(|v| v == pivot) else {
            return Ok(-1);
        };
        let at = match place {
            InsertWhere::Before => pos,
            InsertWhere::After => pos + 1,
        };
        list.insert(at, value);
        let len = list.len() as i64;
        drop(list);
        self.touch_write(key);
        Ok(len)
    }

    /// LREM. Positive count removes head-first, negative tail-first, zero
    /// removes all occurrences. Returns the number removed.
    pub fn lrem(&self, key: &str, count: i64, target: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(0);
        };
        let mut list = body.write();

        let removed = if count >= 0 {
            // Single pass building the kept prefix.
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut kept = VecDeque::with_capacity(list.len());
            let mut removed = 0;
            for value in list.drain(..) {
                if removed < limit && value == target {
                    removed += 1;
                } else {
                    kept.push_back(value);
                }
            }
            *list = kept;
            removed
        } else {
            // Collect match positions, drop the last |count| of them.
            let limit = count.unsigned_abs() as usize;
            let positions: Vec<usize> = list
                .iter()
                .enumerate()
                .filter(|(_, v)| *v == target)
                .map(|(i, _)| i)
                .collect();
            let doomed: std::collections::HashSet<usize> =
                positions.iter().rev().take(limit).copied().collect();
            let mut kept = VecDeque::with_capacity(list.len());
            for (i, value) in list.drain(..).enumerate() {
                if !doomed.contains(&i) {
                    kept.push_back(value);
                }
            }
            *list = kept;
            doomed.len()
        };

        let empty = list.is_empty();
        drop(list);
        if removed > 0 {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(removed as i64)
    }

    /// LTRIM to the inclusive range; an empty range purges the key.
    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(());
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(());
        };
        let mut list = body.write();
        match super::clip_range(start, stop, list.len()) {
            Some((lo, hi)) => {
                list.truncate(hi + 1);
                list.drain(..lo);
            }
            None => list.clear(),
        }
        let empty = list.is_empty();
        drop(list);
        self.purge_if_empty(key, empty);
        self.touch_write(key);
        Ok(())
    }

    pub fn llen(&self, key: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .lists
            .load(key)
            .map(|body| body.read().len() as i64)
            .unwrap_or(0))
    }

    /// LPOS: index of the first occurrence, head-side.
    pub fn lpos(&self, key: &str, target: &str) -> CacheResult<Option<i64>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::List)? {
            return Ok(None);
        }
        let Some(body) = self.keyspace.lists.load(key) else {
            return Ok(None);
        };
        let list = body.read();
        Ok(list.iter().position(|v| v == target).map(|i| i as i64))
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        None
    } else {
        Some(idx as usize)
    }
}
