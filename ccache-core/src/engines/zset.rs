//! # Sorted-Set Engine
//!
//! Score map plus an order index. The ordering law is `(score, member)`
//! lexicographic with IEEE-754 `<` on scores and byte-lex on members;
//! `OrderedFloat` keys make that a plain `BTreeSet` ordering. NaN scores
//! are rejected on input so the index never sees one.

use std::collections::{HashMap, HashSet};

use ordered_float::OrderedFloat;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::{paginate, Db};

type OrderKey = (OrderedFloat<f64>, String);

/// Score interval endpoint: `(value` is exclusive, `-inf`/`+inf` open the
/// interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInf,
    PosInf,
}

impl ScoreBound {
    /// Parses `(1.5`, `-inf`, `3` style bounds.
    pub fn parse(text: &str) -> CacheResult<ScoreBound> {
        match text {
            "-inf" => Ok(ScoreBound::NegInf),
            "+inf" | "inf" => Ok(ScoreBound::PosInf),
            _ if text.starts_with('(') => {
                let value: f64 = text[1..].parse().map_err(|_| CacheError::NotFloat)?;
                Ok(ScoreBound::Exclusive(value))
            }
            _ => {
                let value: f64 = text.parse().map_err(|_| CacheError::NotFloat)?;
                Ok(ScoreBound::Inclusive(value))
            }
        }
    }

    fn admits_low(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(v) => score >= v,
            ScoreBound::Exclusive(v) => score > v,
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
        }
    }

    fn admits_high(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(v) => score <= v,
            ScoreBound::Exclusive(v) => score < v,
            ScoreBound::PosInf => true,
            ScoreBound::NegInf => false,
        }
    }
}

/// Lex interval endpoint: `[m` inclusive, `(m` exclusive, `-`/`+` infinite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    Inclusive(String),
    Exclusive(String),
    Min,
    Max,
}

impl LexBound {
    pub fn parse(text: &str) -> CacheResult<LexBound> {
        match text {
            "-" => Ok(LexBound::Min),
            "+" => Ok(LexBound::Max),
            _ if text.starts_with('[') => Ok(LexBound::Inclusive(text[1..].to_string())),
            _ if text.starts_with('(') => Ok(LexBound::Exclusive(text[1..].to_string())),
            _ => Err(CacheError::Syntax),
        }
    }

    fn admits_low(&self, member: &str) -> bool {
        match self {
            LexBound::Inclusive(v) => member >= v.as_str(),
            LexBound::Exclusive(v) => member > v.as_str(),
            LexBound::Min => true,
            LexBound::Max => false,
        }
    }

    fn admits_high(&self, member: &str) -> bool {
        match self {
            LexBound::Inclusive(v) => member <= v.as_str(),
            LexBound::Exclusive(v) => member < v.as_str(),
            LexBound::Max => true,
            LexBound::Min => false,
        }
    }
}

/// Sorted-set body: member -> score plus the `(score, member)` order index.
/// Serialized as the bare score map; the index rebuilds on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "HashMap<String, f64>", into = "HashMap<String, f64>")]
pub struct ZSetBody {
    scores: HashMap<String, f64>,
    order: std::collections::BTreeSet<OrderKey>,
}

impl From<HashMap<String, f64>> for ZSetBody {
    fn from(scores: HashMap<String, f64>) -> Self {
        let order = scores
            .iter()
            .map(|(m, s)| (OrderedFloat(*s), m.clone()))
            .collect();
        ZSetBody { scores, order }
    }
}

impl From<ZSetBody> for HashMap<String, f64> {
    fn from(body: ZSetBody) -> Self {
        body.scores
    }
}

impl ZSetBody {
    /// Inserts or updates a member. Returns true when the member is new.
    fn upsert(&mut self, member: &str, score: f64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(OrderedFloat(old), member.to_string()));
                self.order.insert((OrderedFloat(score), member.to_string()));
                false
            }
            None => {
                self.order.insert((OrderedFloat(score), member.to_string()));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> Option<f64> {
        let score = self.scores.remove(member)?;
        self.order.remove(&(OrderedFloat(score), member.to_string()));
        Some(score)
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn ranked(&self) -> impl Iterator<Item = (&str, f64)> {
        self.order.iter().map(|(s, m)| (m.as_str(), s.0))
    }

    /// Logical bytes: member lengths plus 8 per score.
    pub(crate) fn footprint(&self) -> usize {
        self.scores.keys().map(|m| m.len() + 8).sum()
    }
}

impl Db {
    /// ZADD. Returns the number of new members; NaN scores are rejected
    /// before anything mutates.
    pub fn zadd(&self, key: &str, pairs: &[(f64, String)]) -> CacheResult<i64> {
        if pairs.iter().any(|(score, _)| score.is_nan()) {
            return Err(CacheError::NanScore);
        }
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::ZSet)?;
        let body = self.keyspace.zsets.load_or_store(key, ZSetBody::default);
        let mut zset = body.write();
        let mut added = 0;
        for (score, member) in pairs {
            if zset.upsert(member, *score) {
                added += 1;
            }
        }
        drop(zset);
        self.touch_write(key);
        Ok(added)
    }

    pub fn zrem(&self, key: &str, members: &[String]) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::ZSet)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.zsets.load(key) else {
            return Ok(0);
        };
        let mut zset = body.write();
        let removed = members.iter().filter(|m| zset.remove(m).is_some()).count();
        let empty = zset.len() == 0;
        drop(zset);
        if removed > 0 {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(removed as i64)
    }

    pub fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::ZSet)? {
            return Ok(None);
        }
        Ok(self
            .keyspace
            .zsets
            .load(key)
            .and_then(|body| body.read().scores.get(member).copied()))
    }

    pub fn zcard(&self, key: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::ZSet)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .zsets
            .load(key)
            .map(|body| body.read().len() as i64)
            .unwrap_or(0))
    }

    pub fn zcount(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<i64> {
        let snapshot = self.zset_snapshot(key)?;
        Ok(snapshot
            .iter()
            .filter(|(_, s)| min.admits_low(*s) && max.admits_high(*s))
            .count() as i64)
    }

    /// ZINCRBY. Creates the member at the delta when absent.
    pub fn zincrby(&self, key: &str, delta: f64, member: &str) -> CacheResult<f64> {
        if delta.is_nan() {
            return Err(CacheError::NanScore);
        }
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::ZSet)?;
        let body = self.keyspace.zsets.load_or_store(key, ZSetBody::default);
        let mut zset = body.write();
        let next = zset.scores.get(member).copied().unwrap_or(0.0) + delta;
        if next.is_nan() {
            return Err(CacheError::NanScore);
        }
        zset.upsert(member, next);
        drop(zset);
        self.touch_write(key);
        Ok(next)
    }

    /// ZRANK / ZREVRANK.
    pub fn zrank(&self, key: &str, member: &str, rev: bool) -> CacheResult<Option<i64>> {
        let snapshot = self.zset_snapshot(key)?;
        let rank = snapshot.iter().position(|(m, _)| m == member);
        Ok(rank.map(|r| {
            if rev {
                (snapshot.len() - 1 - r) as i64
            } else {
                r as i64
            }
        }))
    }

    /// ZRANGE / ZREVRANGE by rank with inclusive clipped indices.
    pub fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> CacheResult<Vec<(String, f64)>> {
        let mut snapshot = self.zset_snapshot(key)?;
        if rev {
            snapshot.reverse();
        }
        match super::clip_range(start, stop, snapshot.len()) {
            Some((lo, hi)) => Ok(snapshot[lo..=hi].to_vec()),
            None => Ok(Vec::new()),
        }
    }

    /// ZRANGEBYSCORE / ZREVRANGEBYSCORE.
    pub fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        rev: bool,
    ) -> CacheResult<Vec<(String, f64)>> {
        let mut matched: Vec<(String, f64)> = self
            .zset_snapshot(key)?
            .into_iter()
            .filter(|(_, s)| min.admits_low(*s) && max.admits_high(*s))
            .collect();
        if rev {
            matched.reverse();
        }
        Ok(matched)
    }

    /// ZRANGEBYLEX / ZREVRANGEBYLEX. Bounds compare members as raw byte
    /// strings.
    pub fn zrange_by_lex(
        &self,
        key: &str,
        min: &LexBound,
        max: &LexBound,
        rev: bool,
    ) -> CacheResult<Vec<(String, f64)>> {
        let mut matched: Vec<(String, f64)> = self
            .zset_snapshot(key)?
            .into_iter()
            .filter(|(m, _)| min.admits_low(m) && max.admits_high(m))
            .collect();
        if rev {
            matched.reverse();
        }
        Ok(matched)
    }

    pub fn zlexcount(&self, key: &str, min: &LexBound, max: &LexBound) -> CacheResult<i64> {
        Ok(self.zrange_by_lex(key, min, max, false)?.len() as i64)
    }

    pub fn zremrange_by_rank(&self, key: &str, start: i64, stop: i64) -> CacheResult<i64> {
        let doomed: Vec<String> = self
            .zrange(key, start, stop, false)?
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        self.zrem(key, &doomed)
    }

    pub fn zremrange_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<i64> {
        let doomed: Vec<String> = self
            .zrange_by_score(key, min, max, false)?
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        self.zrem(key, &doomed)
    }

    pub fn zremrange_by_lex(&self, key: &str, min: &LexBound, max: &LexBound) -> CacheResult<i64> {
        let doomed: Vec<String> = self
            .zrange_by_lex(key, min, max, false)?
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        self.zrem(key, &doomed)
    }

    /// ZPOPMIN / ZPOPMAX.
    pub fn zpop(&self, key: &str, count: usize, max_side: bool) -> CacheResult<Vec<(String, f64)>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::ZSet)? {
            return Ok(Vec::new());
        }
        let Some(body) = self.keyspace.zsets.load(key) else {
            return Ok(Vec::new());
        };
        let mut zset = body.write();
        let mut popped = Vec::with_capacity(count.min(zset.len()));
        for _ in 0..count {
            let target = if max_side {
                zset.order.iter().next_back().cloned()
            } else {
                zset.order.iter().next().cloned()
            };
            match target {
                Some((score, member)) => {
                    zset.remove(&member);
                    popped.push((member, score.0));
                }
                None => break,
            }
        }
        let empty = zset.len() == 0;
        drop(zset);
        if !popped.is_empty() {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(popped)
    }

    pub fn zrandmember(
        &self,
        key: &str,
        count: usize,
        with_duplicates: bool,
    ) -> CacheResult<Vec<(String, f64)>> {
        let snapshot = self.zset_snapshot(key)?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if with_duplicates {
            Ok((0..count)
                .map(|_| snapshot.choose(&mut rng).cloned().expect("non-empty"))
                .collect())
        } else {
            let mut sample = snapshot;
            sample.shuffle(&mut rng);
            sample.truncate(count);
            Ok(sample)
        }
    }

    /// ZSCAN over members, score-ordered for cursor stability.
    pub fn zscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> CacheResult<(u64, Vec<(String, f64)>)> {
        let snapshot = self.zset_snapshot(key)?;
        let scores: HashMap<String, f64> = snapshot.iter().cloned().collect();
        let members: Vec<String> = snapshot
            .into_iter()
            .map(|(m, _)| m)
            .filter(|m| pattern.map_or(true, |p| self.patterns.matches(p, m)))
            .collect();
        let (next, page) = paginate(members, cursor, count);
        let pairs = page.into_iter().map(|m| {
            let score = scores[&m];
            (m, score)
        });
        Ok((next, pairs.collect()))
    }

    /// ZRANGESTORE: rank-range from `src` stored at `dest`.
    pub fn zrangestore(&self, dest: &str, src: &str, start: i64, stop: i64) -> CacheResult<i64> {
        let range = self.zrange(src, start, stop, false)?;
        self.store_zset(dest, range)
    }

    /// ZUNION [WEIGHTS]: contributions `score * weight` summed per member.
    pub fn zunion(&self, keys: &[String], weights: Option<&[f64]>) -> CacheResult<Vec<(String, f64)>> {
        let weights = resolve_weights(keys.len(), weights)?;
        let mut combined: HashMap<String, f64> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            for (member, score) in self.zset_snapshot(key)? {
                *combined.entry(member).or_insert(0.0) += score * weights[i];
            }
        }
        finish_combined(combined)
    }

    /// ZINTER [WEIGHTS]: members present in all inputs; weighted scores sum.
    pub fn zinter(&self, keys: &[String], weights: Option<&[f64]>) -> CacheResult<Vec<(String, f64)>> {
        let weights = resolve_weights(keys.len(), weights)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            let snapshot = self.zset_snapshot(key)?;
            if snapshot.is_empty() {
                return Ok(Vec::new());
            }
            snapshots.push(snapshot.into_iter().collect::<HashMap<String, f64>>());
        }

        let (first, rest) = snapshots.split_first().expect("non-empty inputs");
        let mut combined = HashMap::new();
        'member: for (member, score) in first {
            let mut total = score * weights[0];
            for (i, other) in rest.iter().enumerate() {
                match other.get(member) {
                    Some(s) => total += s * weights[i + 1],
                    None => continue 'member,
                }
            }
            combined.insert(member.clone(), total);
        }
        finish_combined(combined)
    }

    pub fn zintercard(&self, keys: &[String], limit: usize) -> CacheResult<i64> {
        let inter = self.zinter(keys, None)?;
        let cap = if limit == 0 { inter.len() } else { limit };
        Ok(inter.len().min(cap) as i64)
    }

    /// ZDIFF: members of the first input absent from all others, first
    /// input's scores.
    pub fn zdiff(&self, keys: &[String]) -> CacheResult<Vec<(String, f64)>> {
        let (first, rest) = match keys.split_first() {
            Some(split) => split,
            None => return Ok(Vec::new()),
        };
        let mut excluded = HashSet::new();
        for key in rest {
            excluded.extend(self.zset_snapshot(key)?.into_iter().map(|(m, _)| m));
        }
        Ok(self
            .zset_snapshot(first)?
            .into_iter()
            .filter(|(m, _)| !excluded.contains(m))
            .collect())
    }

    pub fn zunionstore(&self, dest: &str, keys: &[String], weights: Option<&[f64]>) -> CacheResult<i64> {
        let combined = self.zunion(keys, weights)?;
        self.store_zset(dest, combined)
    }

    pub fn zinterstore(&self, dest: &str, keys: &[String], weights: Option<&[f64]>) -> CacheResult<i64> {
        let combined = self.zinter(keys, weights)?;
        self.store_zset(dest, combined)
    }

    pub fn zdiffstore(&self, dest: &str, keys: &[String]) -> CacheResult<i64> {
        let combined = self.zdiff(keys)?;
        self.store_zset(dest, combined)
    }

    /// Ordered defensive copy of a zset: `(member, score)` ascending by the
    /// ordering law.
    pub(crate) fn zset_snapshot(&self, key: &str) -> CacheResult<Vec<(String, f64)>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::ZSet)? {
            return Ok(Vec::new());
        }
        Ok(self
            .keyspace
            .zsets
            .load(key)
            .map(|body| {
                body.read()
                    .ranked()
                    .map(|(m, s)| (m.to_string(), s))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub(crate) fn store_zset(&self, dest: &str, entries: Vec<(String, f64)>) -> CacheResult<i64> {
        let len = entries.len() as i64;
        self.del(&[dest.to_string()]);
        if !entries.is_empty() {
            self.keyspace.claim(dest, ValueKind::ZSet)?;
            let body = self.keyspace.zsets.load_or_store(dest, ZSetBody::default);
            let mut zset = body.write();
            for (member, score) in entries {
                zset.upsert(&member, score);
            }
            drop(zset);
            self.touch_write(dest);
        }
        Ok(len)
    }
}

fn resolve_weights(inputs: usize, weights: Option<&[f64]>) -> CacheResult<Vec<f64>> {
    match weights {
        None => Ok(vec![1.0; inputs]),
        Some(w) if w.len() == inputs => Ok(w.to_vec()),
        Some(_) => Err(CacheError::Syntax),
    }
}

fn finish_combined(combined: HashMap<String, f64>) -> CacheResult<Vec<(String, f64)>> {
    if combined.values().any(|s| s.is_nan()) {
        return Err(CacheError::NanScore);
    }
    let mut out: Vec<(String, f64)> = combined.into_iter().collect();
    out.sort_by(|a, b| {
        OrderedFloat(a.1)
            .cmp(&OrderedFloat(b.1))
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zadd_all(db: &Db, key: &str, pairs: &[(f64, &str)]) {
        let pairs: Vec<(f64, String)> = pairs.iter().map(|(s, m)| (*s, m.to_string())).collect();
        db.zadd(key, &pairs).unwrap();
    }

    #[test]
    fn zadd_zscore_roundtrip() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b")]);
        assert_eq!(db.zscore("z", "a").unwrap(), Some(1.0));
        assert_eq!(db.zscore("z", "missing").unwrap(), None);
        assert_eq!(db.zcard("z").unwrap(), 2);

        assert_eq!(
            db.zadd("z", &[(f64::NAN, "x".to_string())]),
            Err(CacheError::NanScore)
        );
    }

    #[test]
    fn equal_scores_order_by_member_bytes() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "bb"), (1.0, "aa"), (1.0, "cc")]);
        let members: Vec<String> = db
            .zrange("z", 0, -1, false)
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(members, vec!["aa", "bb", "cc"]);
    }

    #[test]
    fn zrange_and_rev() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b"), (3.0, "c")]);

        let fwd = db.zrange("z", 0, -1, false).unwrap();
        assert_eq!(fwd[0], ("a".to_string(), 1.0));
        assert_eq!(fwd[2], ("c".to_string(), 3.0));

        let rev = db.zrange("z", 0, 1, true).unwrap();
        assert_eq!(rev, vec![("c".to_string(), 3.0), ("b".to_string(), 2.0)]);
    }

    #[test]
    fn zrank_and_revrank() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert_eq!(db.zrank("z", "a", false).unwrap(), Some(0));
        assert_eq!(db.zrank("z", "a", true).unwrap(), Some(2));
        assert_eq!(db.zrank("z", "missing", false).unwrap(), None);
    }

    #[test]
    fn score_bounds_inclusive_exclusive() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b"), (3.0, "c")]);

        let min = ScoreBound::parse("(1").unwrap();
        let max = ScoreBound::parse("3").unwrap();
        let got = db.zrange_by_score("z", min, max, false).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, "b");

        assert_eq!(
            db.zcount("z", ScoreBound::NegInf, ScoreBound::PosInf).unwrap(),
            3
        );
        assert_eq!(
            db.zcount(
                "z",
                ScoreBound::Exclusive(1.0),
                ScoreBound::Exclusive(3.0)
            )
            .unwrap(),
            1
        );
    }

    #[test]
    fn lex_ranges() {
        let db = Db::new();
        zadd_all(&db, "z", &[(0.0, "a"), (0.0, "b"), (0.0, "c"), (0.0, "d")]);

        let all = db
            .zrange_by_lex("z", &LexBound::Min, &LexBound::Max, false)
            .unwrap();
        assert_eq!(all.len(), 4);

        let some = db
            .zrange_by_lex(
                "z",
                &LexBound::parse("[b").unwrap(),
                &LexBound::parse("(d").unwrap(),
                false,
            )
            .unwrap();
        let members: Vec<&str> = some.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["b", "c"]);
        assert_eq!(
            db.zlexcount("z", &LexBound::Min, &LexBound::parse("[c").unwrap())
                .unwrap(),
            3
        );
    }

    #[test]
    fn weighted_union_matches_contract() {
        let db = Db::new();
        zadd_all(&db, "a", &[(1.0, "x"), (2.0, "y")]);
        zadd_all(&db, "b", &[(3.0, "y"), (4.0, "z")]);

        let count = db
            .zunionstore(
                "d",
                &["a".to_string(), "b".to_string()],
                Some(&[2.0, 0.5]),
            )
            .unwrap();
        assert_eq!(count, 3);

        assert_eq!(db.zscore("d", "x").unwrap(), Some(2.0));
        assert_eq!(db.zscore("d", "y").unwrap(), Some(5.5));
        assert_eq!(db.zscore("d", "z").unwrap(), Some(2.0));

        let ordered = db.zrange("d", 0, -1, false).unwrap();
        assert_eq!(
            ordered,
            vec![
                ("x".to_string(), 2.0),
                ("z".to_string(), 2.0),
                ("y".to_string(), 5.5),
            ]
        );
    }

    #[test]
    fn inter_keeps_common_members_only() {
        let db = Db::new();
        zadd_all(&db, "a", &[(1.0, "x"), (2.0, "y")]);
        zadd_all(&db, "b", &[(10.0, "y"), (4.0, "z")]);

        let inter = db.zinter(&["a".to_string(), "b".to_string()], None).unwrap();
        assert_eq!(inter, vec![("y".to_string(), 12.0)]);
        assert_eq!(
            db.zintercard(&["a".to_string(), "b".to_string()], 0).unwrap(),
            1
        );

        let diff = db.zdiff(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(diff, vec![("x".to_string(), 1.0)]);
    }

    #[test]
    fn mismatched_weights_fail() {
        let db = Db::new();
        zadd_all(&db, "a", &[(1.0, "x")]);
        assert_eq!(
            db.zunion(&["a".to_string()], Some(&[1.0, 2.0])),
            Err(CacheError::Syntax)
        );
    }

    #[test]
    fn zpop_both_sides_and_purge() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b"), (3.0, "c")]);

        assert_eq!(db.zpop("z", 1, false).unwrap(), vec![("a".to_string(), 1.0)]);
        assert_eq!(db.zpop("z", 1, true).unwrap(), vec![("c".to_string(), 3.0)]);
        db.zpop("z", 10, false).unwrap();
        assert_eq!(db.type_of("z"), None);
    }

    #[test]
    fn zremrange_variants() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);

        assert_eq!(db.zremrange_by_rank("z", 0, 0).unwrap(), 1);
        assert_eq!(
            db.zremrange_by_score("z", ScoreBound::Inclusive(4.0), ScoreBound::PosInf)
                .unwrap(),
            1
        );
        assert_eq!(db.zcard("z").unwrap(), 2);
    }

    #[test]
    fn zincrby_and_rangestore() {
        let db = Db::new();
        assert_eq!(db.zincrby("z", 2.5, "m").unwrap(), 2.5);
        assert_eq!(db.zincrby("z", 1.5, "m").unwrap(), 4.0);

        zadd_all(&db, "z", &[(1.0, "low")]);
        assert_eq!(db.zrangestore("dest", "z", 0, 0).unwrap(), 1);
        assert_eq!(db.zscore("dest", "low").unwrap(), Some(1.0));
    }

    #[test]
    fn zrandmember_and_zscan() {
        let db = Db::new();
        zadd_all(&db, "z", &[(1.0, "a"), (2.0, "b")]);

        assert_eq!(db.zrandmember("z", 5, false).unwrap().len(), 2);
        assert_eq!(db.zrandmember("z", 5, true).unwrap().len(), 5);

        let (next, page) = db.zscan("z", 0, None, 10).unwrap();
        assert_eq!(next, 0);
        assert_eq!(page.len(), 2);
    }
}
