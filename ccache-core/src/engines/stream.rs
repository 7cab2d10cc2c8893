//! # Stream Engine
//!
//! Append-only entry log with consumer groups and pending-entry lists.
//! Entry ids are `(ms, seq)` pairs; auto-ids never move backwards. XSETID
//! follows the strict rule: the new last-id must not fall below the
//! stream's top entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

/// Stream entry id: millisecond timestamp plus a per-millisecond sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Parses `ms-seq` or bare `ms` (seq defaults to `default_seq`).
    pub fn parse(text: &str, default_seq: u64) -> CacheResult<StreamId> {
        let (ms, seq) = match text.split_once('-') {
            Some((ms, seq)) => (
                ms.parse().map_err(|_| CacheError::BadStreamId)?,
                seq.parse().map_err(|_| CacheError::BadStreamId)?,
            ),
            None => (
                text.parse().map_err(|_| CacheError::BadStreamId)?,
                default_seq,
            ),
        };
        Ok(StreamId { ms, seq })
    }

    /// Range endpoint: `-` is the minimum, `+` the maximum, `(id` exclusive.
    fn parse_range(text: &str, high_side: bool) -> CacheResult<(StreamId, bool)> {
        match text {
            "-" => Ok((StreamId::ZERO, false)),
            "+" => Ok((StreamId::MAX, false)),
            _ if text.starts_with('(') => {
                let default_seq = if high_side { u64::MAX } else { 0 };
                Ok((StreamId::parse(&text[1..], default_seq)?, true))
            }
            _ => {
                let default_seq = if high_side { u64::MAX } else { 0 };
                Ok((StreamId::parse(text, default_seq)?, false))
            }
        }
    }

    fn next(self) -> StreamId {
        if self.seq == u64::MAX {
            StreamId {
                ms: self.ms + 1,
                seq: 0,
            }
        } else {
            StreamId {
                ms: self.ms,
                seq: self.seq + 1,
            }
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

/// Delivered-but-unacknowledged entry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivered_at_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub consumers: BTreeSet<String>,
    pub pending: BTreeMap<StreamId, PendingEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBody {
    /// Entries sorted ascending by id.
    pub entries: Vec<StreamEntry>,
    /// High-water mark; survives XDEL of the top entry.
    pub last_id: StreamId,
    pub groups: HashMap<String, ConsumerGroup>,
}

impl StreamBody {
    fn top_entry_id(&self) -> StreamId {
        self.entries.last().map(|e| e.id).unwrap_or(StreamId::ZERO)
    }

    fn find(&self, id: StreamId) -> Option<&StreamEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(&id))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// XTRIM strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStrategy {
    MaxLen(usize),
    MinId(StreamId),
}

pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

impl Db {
    /// XADD. `id_spec` is `*`, `ms`, `ms-seq`, or `ms-*`. Explicit ids must
    /// advance the stream.
    pub fn xadd(
        &self,
        key: &str,
        id_spec: &str,
        fields: Vec<(String, String)>,
    ) -> CacheResult<StreamId> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Stream)?;
        let body = self.keyspace.streams.load_or_store(key, StreamBody::default);
        let mut stream = body.write();

        let id = match id_spec {
            "*" => {
                let now = unix_ms().max(stream.last_id.ms);
                if now == stream.last_id.ms {
                    StreamId {
                        ms: now,
                        seq: stream.last_id.seq + 1,
                    }
                } else {
                    StreamId { ms: now, seq: 0 }
                }
            }
            _ if id_spec.ends_with("-*") => {
                let ms: u64 = id_spec[..id_spec.len() - 2]
                    .parse()
                    .map_err(|_| CacheError::BadStreamId)?;
                if ms < stream.last_id.ms {
                    return Err(CacheError::StreamIdTooSmall);
                }
                if ms == stream.last_id.ms {
                    StreamId {
                        ms,
                        seq: stream.last_id.seq + 1,
                    }
                } else {
                    StreamId { ms, seq: 0 }
                }
            }
            _ => {
                let id = StreamId::parse(id_spec, 0)?;
                if id <= stream.last_id {
                    return Err(CacheError::StreamIdTooSmall);
                }
                id
            }
        };

        stream.entries.push(StreamEntry { id, fields });
        stream.last_id = id;
        drop(stream);
        self.touch_write(key);
        Ok(id)
    }

    /// XDEL. Removes entries by id; PEL references stay until acknowledged.
    pub fn xdel(&self, key: &str, ids: &[StreamId]) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.streams.load(key) else {
            return Ok(0);
        };
        let mut stream = body.write();
        let before = stream.entries.len();
        stream.entries.retain(|e| !ids.contains(&e.id));
        let removed = (before - stream.entries.len()) as i64;
        drop(stream);
        if removed > 0 {
            self.touch_write(key);
        }
        Ok(removed)
    }

    pub fn xlen(&self, key: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .streams
            .load(key)
            .map(|body| body.read().entries.len() as i64)
            .unwrap_or(0))
    }

    /// XRANGE / XREVRANGE with `-`, `+`, and `(` exclusive endpoints.
    pub fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
        rev: bool,
    ) -> CacheResult<Vec<StreamEntry>> {
        let (lo, lo_excl) = StreamId::parse_range(start, false)?;
        let (hi, hi_excl) = StreamId::parse_range(end, true)?;

        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Ok(Vec::new());
        }
        let Some(body) = self.keyspace.streams.load(key) else {
            return Ok(Vec::new());
        };
        let stream = body.read();
        let mut matched: Vec<StreamEntry> = stream
            .entries
            .iter()
            .filter(|e| {
                let above = if lo_excl { e.id > lo } else { e.id >= lo };
                let below = if hi_excl { e.id < hi } else { e.id <= hi };
                above && below
            })
            .cloned()
            .collect();
        if rev {
            matched.reverse();
        }
        if let Some(count) = count {
            matched.truncate(count);
        }
        Ok(matched)
    }

    /// XREAD: entries strictly after `after` for each key. `$` resolves to
    /// the stream's current last id (i.e. nothing, for a non-blocking read).
    pub fn xread(
        &self,
        keys_and_ids: &[(String, String)],
        count: Option<usize>,
    ) -> CacheResult<Vec<(String, Vec<StreamEntry>)>> {
        let mut out = Vec::new();
        for (key, after) in keys_and_ids {
            self.expire_if_due(key);
            if !self.keyspace.check(key, ValueKind::Stream)? {
                continue;
            }
            let Some(body) = self.keyspace.streams.load(key) else {
                continue;
            };
            let stream = body.read();
            let after = if after == "$" {
                stream.last_id
            } else {
                StreamId::parse(after, 0)?
            };
            let mut entries: Vec<StreamEntry> = stream
                .entries
                .iter()
                .filter(|e| e.id > after)
                .cloned()
                .collect();
            if let Some(count) = count {
                entries.truncate(count);
            }
            if !entries.is_empty() {
                out.push((key.clone(), entries));
            }
        }
        Ok(out)
    }

    /// XREADGROUP: `>` delivers undelivered entries and grows the PEL; an
    /// explicit id replays the consumer's own pending entries after it.
    pub fn xreadgroup(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        after: &str,
        count: Option<usize>,
    ) -> CacheResult<Vec<StreamEntry>> {
        self.expire_if_due(key);
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();

        if after == ">" {
            let group_state = stream
                .groups
                .get(group)
                .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
            let last = group_state.last_delivered;
            let mut fresh: Vec<StreamEntry> = stream
                .entries
                .iter()
                .filter(|e| e.id > last)
                .cloned()
                .collect();
            if let Some(count) = count {
                fresh.truncate(count);
            }

            let now = unix_ms();
            let group_state = stream.groups.get_mut(group).expect("group exists");
            group_state.consumers.insert(consumer.to_string());
            for entry in &fresh {
                group_state.last_delivered = group_state.last_delivered.max(entry.id);
                group_state.pending.insert(
                    entry.id,
                    PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at_ms: now,
                        delivery_count: 1,
                    },
                );
            }
            drop(stream);
            if !fresh.is_empty() {
                self.touch_write(key);
            }
            return Ok(fresh);
        }

        let after = StreamId::parse(after, 0)?;
        let group_state = stream
            .groups
            .get(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        let ids: Vec<StreamId> = group_state
            .pending
            .range(after.next()..)
            .filter(|(_, p)| p.consumer == consumer)
            .map(|(id, _)| *id)
            .collect();
        let mut replayed: Vec<StreamEntry> = ids
            .iter()
            .filter_map(|id| stream.find(*id).cloned())
            .collect();
        if let Some(count) = count {
            replayed.truncate(count);
        }
        Ok(replayed)
    }

    /// XTRIM. Returns the number of entries removed.
    pub fn xtrim(&self, key: &str, strategy: TrimStrategy) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Ok(0);
        }
        let Some(body) = self.keyspace.streams.load(key) else {
            return Ok(0);
        };
        let mut stream = body.write();
        let before = stream.entries.len();
        match strategy {
            TrimStrategy::MaxLen(max) => {
                let excess = stream.entries.len().saturating_sub(max);
                stream.entries.drain(..excess);
            }
            TrimStrategy::MinId(min) => {
                stream.entries.retain(|e| e.id >= min);
            }
        }
        let removed = (before - stream.entries.len()) as i64;
        drop(stream);
        if removed > 0 {
            self.touch_write(key);
        }
        Ok(removed)
    }

    /// XSETID under the strict rule: the new last-id must be at least the
    /// top entry id.
    pub fn xsetid(&self, key: &str, id: StreamId) -> CacheResult<()> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self
            .keyspace
            .streams
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let mut stream = body.write();
        if id < stream.top_entry_id() {
            return Err(CacheError::other(
                "The ID specified in XSETID is smaller than the target stream top item",
            ));
        }
        stream.last_id = id;
        drop(stream);
        self.touch_write(key);
        Ok(())
    }

    /// XGROUP CREATE. `start` is an id or `$` for the current last id.
    pub fn xgroup_create(
        &self,
        key: &str,
        group: &str,
        start: &str,
        mkstream: bool,
    ) -> CacheResult<()> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            if !mkstream {
                return Err(CacheError::other(
                    "The XGROUP subcommand requires the key to exist. \
                     Note that for CREATE you may want to use the MKSTREAM option",
                ));
            }
            self.keyspace.claim(key, ValueKind::Stream)?;
        }
        let body = self.keyspace.streams.load_or_store(key, StreamBody::default);
        let mut stream = body.write();
        if stream.groups.contains_key(group) {
            return Err(CacheError::BusyGroup);
        }
        let last_delivered = if start == "$" {
            stream.last_id
        } else {
            StreamId::parse(start, 0)?
        };
        stream.groups.insert(
            group.to_string(),
            ConsumerGroup {
                last_delivered,
                ..ConsumerGroup::default()
            },
        );
        drop(stream);
        self.touch_write(key);
        Ok(())
    }

    pub fn xgroup_destroy(&self, key: &str, group: &str) -> CacheResult<bool> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Ok(false);
        }
        let Some(body) = self.keyspace.streams.load(key) else {
            return Ok(false);
        };
        let removed = body.write().groups.remove(group).is_some();
        if removed {
            self.touch_write(key);
        }
        Ok(removed)
    }

    pub fn xgroup_create_consumer(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
    ) -> CacheResult<bool> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let group_state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        let created = group_state.consumers.insert(consumer.to_string());
        drop(stream);
        if created {
            self.touch_write(key);
        }
        Ok(created)
    }

    /// XGROUP DELCONSUMER. Returns the number of pending entries dropped.
    pub fn xgroup_del_consumer(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
    ) -> CacheResult<i64> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let group_state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        let before = group_state.pending.len();
        group_state.pending.retain(|_, p| p.consumer != consumer);
        let dropped = (before - group_state.pending.len()) as i64;
        group_state.consumers.remove(consumer);
        drop(stream);
        self.touch_write(key);
        Ok(dropped)
    }

    pub fn xgroup_setid(&self, key: &str, group: &str, start: &str) -> CacheResult<()> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let last = if start == "$" {
            stream.last_id
        } else {
            StreamId::parse(start, 0)?
        };
        let group_state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        group_state.last_delivered = last;
        drop(stream);
        self.touch_write(key);
        Ok(())
    }

    /// XACK. Returns the number of entries acknowledged.
    pub fn xack(&self, key: &str, group: &str, ids: &[StreamId]) -> CacheResult<i64> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let group_state = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        let mut acked = 0;
        for id in ids {
            if group_state.pending.remove(id).is_some() {
                acked += 1;
            }
        }
        drop(stream);
        if acked > 0 {
            self.touch_write(key);
        }
        Ok(acked)
    }

    /// XCLAIM: transfers ownership of pending entries idle for at least
    /// `min_idle`.
    pub fn xclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[StreamId],
    ) -> CacheResult<Vec<StreamEntry>> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let now = unix_ms();
        let mut claimed_ids = Vec::new();
        {
            let group_state = stream
                .groups
                .get_mut(group)
                .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
            group_state.consumers.insert(consumer.to_string());
            for id in ids {
                if let Some(pending) = group_state.pending.get_mut(id) {
                    let idle = now.saturating_sub(pending.delivered_at_ms);
                    if idle >= min_idle.as_millis() as u64 {
                        pending.consumer = consumer.to_string();
                        pending.delivered_at_ms = now;
                        pending.delivery_count += 1;
                        claimed_ids.push(*id);
                    }
                }
            }
        }
        let claimed: Vec<StreamEntry> = claimed_ids
            .iter()
            .filter_map(|id| stream.find(*id).cloned())
            .collect();
        drop(stream);
        if !claimed.is_empty() {
            self.touch_write(key);
        }
        Ok(claimed)
    }

    /// XAUTOCLAIM: scans the PEL from `start`, claiming idle entries up to
    /// `count`. Returns the next scan cursor and the claimed entries.
    pub fn xautoclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: StreamId,
        count: usize,
    ) -> CacheResult<(StreamId, Vec<StreamEntry>)> {
        let body = self.stream_body(key, group)?;
        let mut stream = body.write();
        let now = unix_ms();

        let candidates: Vec<StreamId> = {
            let group_state = stream
                .groups
                .get(group)
                .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
            group_state
                .pending
                .range(start..)
                .filter(|(_, p)| {
                    now.saturating_sub(p.delivered_at_ms) >= min_idle.as_millis() as u64
                })
                .map(|(id, _)| *id)
                .take(count)
                .collect()
        };

        let next_cursor = candidates
            .last()
            .map(|id| id.next())
            .unwrap_or(StreamId::ZERO);

        {
            let group_state = stream.groups.get_mut(group).expect("group exists");
            group_state.consumers.insert(consumer.to_string());
            for id in &candidates {
                if let Some(pending) = group_state.pending.get_mut(id) {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at_ms = now;
                    pending.delivery_count += 1;
                }
            }
        }

        let claimed: Vec<StreamEntry> = candidates
            .iter()
            .filter_map(|id| stream.find(*id).cloned())
            .collect();
        drop(stream);
        if !claimed.is_empty() {
            self.touch_write(key);
        }
        Ok((next_cursor, claimed))
    }

    /// XPENDING summary: total, smallest and largest pending ids, and
    /// per-consumer counts.
    pub fn xpending(
        &self,
        key: &str,
        group: &str,
    ) -> CacheResult<(i64, Option<StreamId>, Option<StreamId>, Vec<(String, i64)>)> {
        let body = self.stream_body(key, group)?;
        let stream = body.read();
        let group_state = stream
            .groups
            .get(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;

        let total = group_state.pending.len() as i64;
        let min = group_state.pending.keys().next().copied();
        let max = group_state.pending.keys().next_back().copied();

        let mut per_consumer: HashMap<String, i64> = HashMap::new();
        for pending in group_state.pending.values() {
            *per_consumer.entry(pending.consumer.clone()).or_insert(0) += 1;
        }
        let mut per_consumer: Vec<(String, i64)> = per_consumer.into_iter().collect();
        per_consumer.sort();
        Ok((total, min, max, per_consumer))
    }

    /// XINFO STREAM: (length, last id, group count, first entry, last entry).
    pub fn xinfo_stream(
        &self,
        key: &str,
    ) -> CacheResult<(i64, StreamId, i64, Option<StreamEntry>, Option<StreamEntry>)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self
            .keyspace
            .streams
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let stream = body.read();
        Ok((
            stream.entries.len() as i64,
            stream.last_id,
            stream.groups.len() as i64,
            stream.entries.first().cloned(),
            stream.entries.last().cloned(),
        ))
    }

    /// XINFO GROUPS: (name, consumer count, pending count, last delivered).
    pub fn xinfo_groups(&self, key: &str) -> CacheResult<Vec<(String, i64, i64, StreamId)>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self
            .keyspace
            .streams
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let stream = body.read();
        let mut out: Vec<(String, i64, i64, StreamId)> = stream
            .groups
            .iter()
            .map(|(name, g)| {
                (
                    name.clone(),
                    g.consumers.len() as i64,
                    g.pending.len() as i64,
                    g.last_delivered,
                )
            })
            .collect();
        out.sort();
        Ok(out)
    }

    /// XINFO CONSUMERS: (name, pending count).
    pub fn xinfo_consumers(&self, key: &str, group: &str) -> CacheResult<Vec<(String, i64)>> {
        let body = self.stream_body(key, group)?;
        let stream = body.read();
        let group_state = stream
            .groups
            .get(group)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))?;
        Ok(group_state
            .consumers
            .iter()
            .map(|name| {
                let pending = group_state
                    .pending
                    .values()
                    .filter(|p| &p.consumer == name)
                    .count() as i64;
                (name.clone(), pending)
            })
            .collect())
    }

    /// Resolves the stream body for group operations, surfacing NOGROUP for
    /// missing keys so group commands have one error shape.
    fn stream_body(
        &self,
        key: &str,
        group: &str,
    ) -> CacheResult<crate::shard::Body<StreamBody>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Stream)? {
            return Err(CacheError::NoGroup(group.to_string(), key.to_string()));
        }
        self.keyspace
            .streams
            .load(key)
            .ok_or_else(|| CacheError::NoGroup(group.to_string(), key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn auto_ids_never_move_backwards() {
        let db = Db::new();
        let first = db.xadd("s", "*", fields(&[("a", "1")])).unwrap();
        let second = db.xadd("s", "*", fields(&[("a", "2")])).unwrap();
        assert!(second > first);

        // Same-millisecond ids advance the sequence.
        let forced = db
            .xadd("s", &format!("{}-{}", u64::MAX - 1, 0), fields(&[("a", "3")]))
            .unwrap();
        let bumped = db
            .xadd("s", &format!("{}-*", u64::MAX - 1), fields(&[("a", "4")]))
            .unwrap();
        assert_eq!(bumped, StreamId { ms: forced.ms, seq: 1 });
    }

    #[test]
    fn explicit_ids_must_advance() {
        let db = Db::new();
        db.xadd("s", "5-1", fields(&[("a", "1")])).unwrap();
        assert_eq!(
            db.xadd("s", "5-1", fields(&[("a", "2")])),
            Err(CacheError::StreamIdTooSmall)
        );
        assert_eq!(
            db.xadd("s", "4-9", fields(&[("a", "2")])),
            Err(CacheError::StreamIdTooSmall)
        );
        db.xadd("s", "5-2", fields(&[("a", "3")])).unwrap();
        assert_eq!(db.xlen("s").unwrap(), 2);
    }

    #[test]
    fn xrange_endpoints() {
        let db = Db::new();
        for i in 1..=5 {
            db.xadd("s", &format!("{}-0", i), fields(&[("n", "v")]))
                .unwrap();
        }

        assert_eq!(db.xrange("s", "-", "+", None, false).unwrap().len(), 5);
        assert_eq!(db.xrange("s", "2-0", "4-0", None, false).unwrap().len(), 3);
        assert_eq!(db.xrange("s", "(2-0", "4-0", None, false).unwrap().len(), 2);
        assert_eq!(db.xrange("s", "-", "+", Some(2), false).unwrap().len(), 2);

        let rev = db.xrange("s", "-", "+", Some(2), true).unwrap();
        assert_eq!(rev[0].id, StreamId { ms: 5, seq: 0 });
    }

    #[test]
    fn xread_returns_entries_after_id() {
        let db = Db::new();
        db.xadd("s", "1-0", fields(&[("a", "1")])).unwrap();
        db.xadd("s", "2-0", fields(&[("a", "2")])).unwrap();

        let out = db
            .xread(&[("s".to_string(), "1-0".to_string())], None)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.len(), 1);
        assert_eq!(out[0].1[0].id, StreamId { ms: 2, seq: 0 });

        let nothing = db
            .xread(&[("s".to_string(), "$".to_string())], None)
            .unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn group_lifecycle_and_pel() {
        let db = Db::new();
        db.xadd("s", "1-0", fields(&[("a", "1")])).unwrap();
        db.xadd("s", "2-0", fields(&[("a", "2")])).unwrap();

        db.xgroup_create("s", "g", "0", false).unwrap();
        assert_eq!(
            db.xgroup_create("s", "g", "0", false),
            Err(CacheError::BusyGroup)
        );

        let delivered = db.xreadgroup("s", "g", "alice", ">", None).unwrap();
        assert_eq!(delivered.len(), 2);

        let (total, min, max, per_consumer) = db.xpending("s", "g").unwrap();
        assert_eq!(total, 2);
        assert_eq!(min, Some(StreamId { ms: 1, seq: 0 }));
        assert_eq!(max, Some(StreamId { ms: 2, seq: 0 }));
        assert_eq!(per_consumer, vec![("alice".to_string(), 2)]);

        assert_eq!(db.xack("s", "g", &[StreamId { ms: 1, seq: 0 }]).unwrap(), 1);
        let (total, ..) = db.xpending("s", "g").unwrap();
        assert_eq!(total, 1);

        // Nothing new to deliver.
        assert!(db.xreadgroup("s", "g", "alice", ">", None).unwrap().is_empty());
    }

    #[test]
    fn xclaim_transfers_idle_entries() {
        let db = Db::new();
        db.xadd("s", "1-0", fields(&[("a", "1")])).unwrap();
        db.xgroup_create("s", "g", "0", false).unwrap();
        db.xreadgroup("s", "g", "alice", ">", None).unwrap();

        // Zero min-idle claims immediately.
        let claimed = db
            .xclaim(
                "s",
                "g",
                "bob",
                Duration::ZERO,
                &[StreamId { ms: 1, seq: 0 }],
            )
            .unwrap();
        assert_eq!(claimed.len(), 1);
        let (_, _, _, per_consumer) = db.xpending("s", "g").unwrap();
        assert_eq!(per_consumer, vec![("bob".to_string(), 1)]);

        // A large min-idle claims nothing right after delivery.
        let not_claimed = db
            .xclaim(
                "s",
                "g",
                "carol",
                Duration::from_secs(3600),
                &[StreamId { ms: 1, seq: 0 }],
            )
            .unwrap();
        assert!(not_claimed.is_empty());
    }

    #[test]
    fn xautoclaim_scans_pel() {
        let db = Db::new();
        for i in 1..=3 {
            db.xadd("s", &format!("{}-0", i), fields(&[("a", "v")]))
                .unwrap();
        }
        db.xgroup_create("s", "g", "0", false).unwrap();
        db.xreadgroup("s", "g", "alice", ">", None).unwrap();

        let (cursor, claimed) = db
            .xautoclaim("s", "g", "bob", Duration::ZERO, StreamId::ZERO, 2)
            .unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(cursor > StreamId::ZERO);

        let (_, rest) = db
            .xautoclaim("s", "g", "bob", Duration::ZERO, cursor, 10)
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn strict_xsetid() {
        let db = Db::new();
        db.xadd("s", "5-0", fields(&[("a", "1")])).unwrap();

        assert!(db.xsetid("s", StreamId { ms: 4, seq: 0 }).is_err());
        db.xsetid("s", StreamId { ms: 9, seq: 0 }).unwrap();
        let next = db.xadd("s", "*", fields(&[("a", "2")])).unwrap();
        assert!(next > StreamId { ms: 9, seq: 0 });
    }

    #[test]
    fn xtrim_strategies() {
        let db = Db::new();
        for i in 1..=5 {
            db.xadd("s", &format!("{}-0", i), fields(&[("a", "v")]))
                .unwrap();
        }

        assert_eq!(db.xtrim("s", TrimStrategy::MaxLen(3)).unwrap(), 2);
        assert_eq!(db.xlen("s").unwrap(), 3);
        assert_eq!(
            db.xtrim("s", TrimStrategy::MinId(StreamId { ms: 5, seq: 0 }))
                .unwrap(),
            2
        );
        assert_eq!(db.xlen("s").unwrap(), 1);
    }

    #[test]
    fn xinfo_shapes() {
        let db = Db::new();
        db.xadd("s", "1-0", fields(&[("a", "1")])).unwrap();
        db.xgroup_create("s", "g", "0", false).unwrap();
        db.xgroup_create_consumer("s", "g", "alice").unwrap();

        let (len, last, groups, first, _) = db.xinfo_stream("s").unwrap();
        assert_eq!(len, 1);
        assert_eq!(last, StreamId { ms: 1, seq: 0 });
        assert_eq!(groups, 1);
        assert!(first.is_some());

        let groups = db.xinfo_groups("s").unwrap();
        assert_eq!(groups[0].0, "g");
        assert_eq!(groups[0].1, 1);

        let consumers = db.xinfo_consumers("s", "g").unwrap();
        assert_eq!(consumers, vec![("alice".to_string(), 0)]);

        assert_eq!(db.xgroup_del_consumer("s", "g", "alice").unwrap(), 0);
        assert!(db.xgroup_destroy("s", "g").unwrap());
        assert!(!db.xgroup_destroy("s", "g").unwrap());
    }
}
