//! # Set Engine
//!
//! Unordered unique strings. Intersections iterate the smallest input and
//! probe the rest; all wide reads return defensive copies.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use ccache_common::{CacheResult, ValueKind};

use crate::db::{paginate, Db};

impl Db {
    /// SADD. Returns the number of members actually added.
    pub fn sadd(&self, key: &str, members: &[String]) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Set)?;
        let body = self.keyspace.sets.load_or_store(key, HashSet::new);
        let mut set = body.write();
        let mut added = 0;
        for member in members {
            if set.insert(member.clone()) {
                added += 1;
            }
        }
        drop(set);
        if added > 0 {
            self.touch_write(key);
        }
        Ok(added)
    }

    /// SREM. Purges the key when the set empties.
    pub fn srem(&self, key: &str, members: &[String]) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.sets.load(key) else {
            return Ok(0);
        };
        let mut set = body.write();
        let mut removed = 0;
        for member in members {
            if set.remove(member) {
                removed += 1;
            }
        }
        let empty = set.is_empty();
        drop(set);
        if removed > 0 {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(removed)
    }

    pub fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(false);
        }
        Ok(self
            .keyspace
            .sets
            .load(key)
            .map(|body| body.read().contains(member))
            .unwrap_or(false))
    }

    pub fn smismember(&self, key: &str, members: &[String]) -> CacheResult<Vec<bool>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(vec![false; members.len()]);
        }
        let Some(body) = self.keyspace.sets.load(key) else {
            return Ok(vec![false; members.len()]);
        };
        let set = body.read();
        Ok(members.iter().map(|m| set.contains(m)).collect())
    }

    /// SMEMBERS as a sorted defensive copy.
    pub fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(Vec::new());
        }
        let mut members: Vec<String> = self
            .keyspace
            .sets
            .load(key)
            .map(|body| body.read().iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    /// SMEMBERS filtered by a glob pattern.
    pub fn smembers_pattern(&self, key: &str, pattern: &str) -> CacheResult<Vec<String>> {
        Ok(self
            .smembers(key)?
            .into_iter()
            .filter(|m| self.patterns.matches(pattern, m))
            .collect())
    }

    pub fn scard(&self, key: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .sets
            .load(key)
            .map(|body| body.read().len() as i64)
            .unwrap_or(0))
    }

    /// SPOP with count: removes and returns up to `count` random members.
    pub fn spop(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(Vec::new());
        }
        let Some(body) = self.keyspace.sets.load(key) else {
            return Ok(Vec::new());
        };
        let mut set = body.write();
        let mut members: Vec<String> = set.iter().cloned().collect();
        members.shuffle(&mut rand::thread_rng());
        members.truncate(count);
        for member in &members {
            set.remove(member);
        }
        let empty = set.is_empty();
        drop(set);

        if !members.is_empty() {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(members)
    }

    /// SRANDMEMBER: distinct sample for positive counts, duplicates allowed
    /// for negative (the dispatch layer passes `with_duplicates`).
    pub fn srandmember(
        &self,
        key: &str,
        count: usize,
        with_duplicates: bool,
    ) -> CacheResult<Vec<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(Vec::new());
        }
        let members: Vec<String> = self
            .keyspace
            .sets
            .load(key)
            .map(|body| body.read().iter().cloned().collect())
            .unwrap_or_default();
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if with_duplicates {
            Ok((0..count)
                .map(|_| members.choose(&mut rng).cloned().expect("non-empty"))
                .collect())
        } else {
            let mut sample = members;
            sample.shuffle(&mut rng);
            sample.truncate(count);
            Ok(sample)
        }
    }

    /// SMOVE. Returns whether the member moved.
    pub fn smove(&self, source: &str, dest: &str, member: &str) -> CacheResult<bool> {
        // Validate the destination type before mutating the source.
        self.expire_if_due(dest);
        self.keyspace.check(dest, ValueKind::Set)?;
        if self.srem(source, &[member.to_string()])? == 0 {
            return Ok(false);
        }
        self.sadd(dest, &[member.to_string()])?;
        Ok(true)
    }

    pub fn sdiff(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        let (first, rest) = match keys.split_first() {
            Some(split) => split,
            None => return Ok(Vec::new()),
        };
        let mut result = self.read_set(first)?;
        for key in rest {
            let other = self.read_set(key)?;
            result.retain(|m| !other.contains(m));
            if result.is_empty() {
                break;
            }
        }
        Ok(sorted(result))
    }

    /// SINTER: iterate the smallest input, probe the rest, short-circuit on
    /// any empty input.
    pub fn sinter(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            let set = self.read_set(key)?;
            if set.is_empty() {
                return Ok(Vec::new());
            }
            sets.push(set);
        }
        sets.sort_by_key(|s| s.len());

        let (smallest, rest) = sets.split_first().expect("non-empty inputs");
        let result: HashSet<String> = smallest
            .iter()
            .filter(|m| rest.iter().all(|s| s.contains(*m)))
            .cloned()
            .collect();
        Ok(sorted(result))
    }

    /// SINTERCARD with an optional limit (0 = unlimited).
    pub fn sintercard(&self, keys: &[String], limit: usize) -> CacheResult<i64> {
        let inter = self.sinter(keys)?;
        let cap = if limit == 0 { inter.len() } else { limit };
        Ok(inter.len().min(cap) as i64)
    }

    pub fn sunion(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        let mut result = HashSet::new();
        for key in keys {
            result.extend(self.read_set(key)?);
        }
        Ok(sorted(result))
    }

    pub fn sdiffstore(&self, dest: &str, keys: &[String]) -> CacheResult<i64> {
        let members = self.sdiff(keys)?;
        self.store_set(dest, members)
    }

    pub fn sinterstore(&self, dest: &str, keys: &[String]) -> CacheResult<i64> {
        let members = self.sinter(keys)?;
        self.store_set(dest, members)
    }

    pub fn sunionstore(&self, dest: &str, keys: &[String]) -> CacheResult<i64> {
        let members = self.sunion(keys)?;
        self.store_set(dest, members)
    }

    /// SDIFFSTOREDEL: stores the difference at `dest` and atomically removes
    /// the diffed members from the first source set.
    pub fn sdiffstore_del(&self, dest: &str, keys: &[String]) -> CacheResult<i64> {
        let members = self.sdiff(keys)?;
        if let Some(source) = keys.first() {
            self.srem(source, &members)?;
        }
        self.store_set(dest, members)
    }

    /// SSCAN over members, sorted for cursor stability.
    pub fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let members: Vec<String> = self
            .smembers(key)?
            .into_iter()
            .filter(|m| pattern.map_or(true, |p| self.patterns.matches(p, m)))
            .collect();
        Ok(paginate(members, cursor, count))
    }

    fn read_set(&self, key: &str) -> CacheResult<HashSet<String>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Set)? {
            return Ok(HashSet::new());
        }
        Ok(self
            .keyspace
            .sets
            .load(key)
            .map(|body| body.read().clone())
            .unwrap_or_default())
    }

    /// Replaces `dest` with `members`; an empty result deletes `dest`.
    fn store_set(&self, dest: &str, members: Vec<String>) -> CacheResult<i64> {
        let len = members.len() as i64;
        self.del(&[dest.to_string()]);
        if !members.is_empty() {
            self.keyspace.claim(dest, ValueKind::Set)?;
            let body = self.keyspace.sets.load_or_store(dest, HashSet::new);
            *body.write() = members.into_iter().collect();
            self.touch_write(dest);
        }
        Ok(len)
    }
}

fn sorted(set: HashSet<String>) -> Vec<String> {
    let mut members: Vec<String> = set.into_iter().collect();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sadd_srem_roundtrip() {
        let db = Db::new();
        assert_eq!(db.sadd("s", &strs(&["a", "b", "a"])).unwrap(), 2);
        assert!(db.sismember("s", "a").unwrap());
        assert!(!db.sismember("s", "z").unwrap());
        assert_eq!(db.scard("s").unwrap(), 2);

        assert_eq!(db.srem("s", &strs(&["a", "z"])).unwrap(), 1);
        assert_eq!(db.srem("s", &strs(&["b"])).unwrap(), 1);
        assert_eq!(db.type_of("s"), None);
    }

    #[test]
    fn set_algebra() {
        let db = Db::new();
        db.sadd("a", &strs(&["1", "2", "3", "4"])).unwrap();
        db.sadd("b", &strs(&["3", "4", "5"])).unwrap();
        db.sadd("c", &strs(&["4", "6"])).unwrap();

        assert_eq!(db.sdiff(&strs(&["a", "b"])).unwrap(), strs(&["1", "2"]));
        assert_eq!(db.sinter(&strs(&["a", "b"])).unwrap(), strs(&["3", "4"]));
        assert_eq!(db.sinter(&strs(&["a", "b", "c"])).unwrap(), strs(&["4"]));
        assert_eq!(
            db.sunion(&strs(&["b", "c"])).unwrap(),
            strs(&["3", "4", "5", "6"])
        );
        assert_eq!(db.sinter(&strs(&["a", "missing"])).unwrap(), Vec::<String>::new());
        assert_eq!(db.sintercard(&strs(&["a", "b"]), 0).unwrap(), 2);
        assert_eq!(db.sintercard(&strs(&["a", "b"]), 1).unwrap(), 1);
    }

    #[test]
    fn store_variants_replace_dest() {
        let db = Db::new();
        db.sadd("a", &strs(&["1", "2", "3"])).unwrap();
        db.sadd("b", &strs(&["3"])).unwrap();
        db.set("d", "old".to_string()).unwrap();

        assert_eq!(db.sdiffstore("d", &strs(&["a", "b"])).unwrap(), 2);
        assert_eq!(db.smembers("d").unwrap(), strs(&["1", "2"]));

        // Empty result deletes the destination.
        assert_eq!(db.sinterstore("d", &strs(&["a", "missing"])).unwrap(), 0);
        assert_eq!(db.type_of("d"), None);
    }

    #[test]
    fn sdiffstore_del_removes_from_source() {
        let db = Db::new();
        db.sadd("src", &strs(&["1", "2", "3"])).unwrap();
        db.sadd("other", &strs(&["3"])).unwrap();

        assert_eq!(db.sdiffstore_del("d", &strs(&["src", "other"])).unwrap(), 2);
        assert_eq!(db.smembers("d").unwrap(), strs(&["1", "2"]));
        assert_eq!(db.smembers("src").unwrap(), strs(&["3"]));
    }

    #[test]
    fn spop_removes_and_purges() {
        let db = Db::new();
        db.sadd("s", &strs(&["a", "b", "c"])).unwrap();
        let popped = db.spop("s", 2).unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(db.scard("s").unwrap(), 1);

        db.spop("s", 5).unwrap();
        assert_eq!(db.type_of("s"), None);
    }

    #[test]
    fn srandmember_counts() {
        let db = Db::new();
        db.sadd("s", &strs(&["a", "b"])).unwrap();
        assert_eq!(db.srandmember("s", 10, false).unwrap().len(), 2);
        assert_eq!(db.srandmember("s", 10, true).unwrap().len(), 10);
    }

    #[test]
    fn smove_between_sets() {
        let db = Db::new();
        db.sadd("a", &strs(&["x", "y"])).unwrap();
        db.sadd("b", &strs(&["z"])).unwrap();

        assert!(db.smove("a", "b", "x").unwrap());
        assert!(!db.smove("a", "b", "nope").unwrap());
        assert_eq!(db.smembers("b").unwrap(), strs(&["x", "z"]));
        assert_eq!(db.smembers("a").unwrap(), strs(&["y"]));
    }

    #[test]
    fn smembers_pattern_filters() {
        let db = Db::new();
        db.sadd("s", &strs(&["user:1", "user:2", "admin:1"])).unwrap();
        assert_eq!(
            db.smembers_pattern("s", "user:*").unwrap(),
            strs(&["user:1", "user:2"])
        );
    }

    #[test]
    fn sscan_pages() {
        let db = Db::new();
        let members: Vec<String> = (0..7).map(|i| format!("m{}", i)).collect();
        db.sadd("s", &members).unwrap();

        let (next, page) = db.sscan("s", 0, None, 5).unwrap();
        assert_eq!(page.len(), 5);
        let (done, rest) = db.sscan("s", next, None, 5).unwrap();
        assert_eq!(done, 0);
        assert_eq!(rest.len(), 2);
    }
}
