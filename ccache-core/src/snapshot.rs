//! # Snapshot and Replay
//!
//! Typed state records for the persistence collaborator: `(kind, key, body
//! bytes, optional absolute expiry)`. `snapshot` walks every shard and
//! yields one record per live key; `replay` is the inverse. Bodies are
//! bincode-encoded so the record format is independent of in-memory layout.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::expire::ExpireMode;
use crate::shard::TypedShard;

/// One persisted key state. `body: None` is a tombstone (deletion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub kind: ValueKind,
    pub key: String,
    pub body: Option<Vec<u8>>,
    pub expire_at_unix_ms: Option<u64>,
}

impl SnapshotRecord {
    pub fn tombstone(key: &str) -> Self {
        SnapshotRecord {
            kind: ValueKind::Str,
            key: key.to_string(),
            body: None,
            expire_at_unix_ms: None,
        }
    }
}

impl Db {
    /// Builds the record for one live key, or None when the key is absent.
    pub(crate) fn record_for(&self, key: &str) -> Option<SnapshotRecord> {
        let kind = self.keyspace.kind_of(key)?;
        let body = self.encode_body(key, kind)?;
        Some(SnapshotRecord {
            kind,
            key: key.to_string(),
            body: Some(body),
            expire_at_unix_ms: self.expire_unix_ms(key),
        })
    }

    fn expire_unix_ms(&self, key: &str) -> Option<u64> {
        let remaining = self.expirations.remaining(key, Instant::now())?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Some(now_ms + remaining.as_millis() as u64)
    }

    fn encode_body(&self, key: &str, kind: ValueKind) -> Option<Vec<u8>> {
        fn enc<B: serde::Serialize>(shard: &TypedShard<B>, key: &str) -> Option<Vec<u8>> {
            let body = shard.load(key)?;
            let guard = body.read();
            bincode::serialize(&*guard).ok()
        }

        match kind {
            ValueKind::Str => enc(&self.keyspace.strings, key),
            ValueKind::Hash => enc(&self.keyspace.hashes, key),
            ValueKind::List => enc(&self.keyspace.lists, key),
            ValueKind::Set => enc(&self.keyspace.sets, key),
            ValueKind::ZSet => enc(&self.keyspace.zsets, key),
            ValueKind::Stream => enc(&self.keyspace.streams, key),
            ValueKind::Bitmap => enc(&self.keyspace.bitmaps, key),
            // Documents go through their own text form: bincode is not
            // self-describing, which `serde_json::Value` requires.
            ValueKind::Json => self
                .keyspace
                .json
                .load(key)
                .map(|body| body.read().to_string().into_bytes()),
            ValueKind::Geo => enc(&self.keyspace.geo, key),
            ValueKind::Hll => enc(&self.keyspace.hll, key),
            ValueKind::Bloom => enc(&self.keyspace.bloom, key),
            ValueKind::Cuckoo => enc(&self.keyspace.cuckoo, key),
            ValueKind::Cms => enc(&self.keyspace.cms, key),
            ValueKind::TDigest => enc(&self.keyspace.tdigest, key),
            ValueKind::TopK => enc(&self.keyspace.topk, key),
            ValueKind::Suggest => enc(&self.keyspace.suggest, key),
        }
    }

    /// Streams one record per live key across every shard.
    pub fn snapshot(&self) -> Vec<SnapshotRecord> {
        let mut records = Vec::with_capacity(self.keyspace.len());
        for key in self.keyspace.keys() {
            self.expire_if_due(&key);
            if let Some(record) = self.record_for(&key) {
                records.push(record);
            }
        }
        records
    }

    /// Restores one record. Replaces any existing value at the key.
    pub fn replay(&self, record: &SnapshotRecord) -> CacheResult<()> {
        let Some(body) = &record.body else {
            self.del(&[record.key.clone()]);
            return Ok(());
        };

        self.keyspace.remove(&record.key);
        self.expirations.clear(&record.key);
        self.keyspace.claim(&record.key, record.kind)?;
        self.decode_body(&record.key, record.kind, body)?;

        if let Some(at_ms) = record.expire_at_unix_ms {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64;
            let remaining = Duration::from_millis(at_ms.saturating_sub(now_ms));
            self.expirations
                .set(&record.key, Instant::now() + remaining, ExpireMode::Always);
        }
        self.versions.bump(&record.key);
        Ok(())
    }

    fn decode_body(&self, key: &str, kind: ValueKind, bytes: &[u8]) -> CacheResult<()> {
        // The caller removed any previous value, so the factory always runs.
        fn dec<B: serde::de::DeserializeOwned>(
            shard: &TypedShard<B>,
            key: &str,
            bytes: &[u8],
        ) -> CacheResult<()> {
            let body: B = bincode::deserialize(bytes)
                .map_err(|_| CacheError::other("corrupt snapshot record"))?;
            shard.load_or_store(key, || body);
            Ok(())
        }

        match kind {
            ValueKind::Str => dec(&self.keyspace.strings, key, bytes),
            ValueKind::Hash => dec(&self.keyspace.hashes, key, bytes),
            ValueKind::List => dec(&self.keyspace.lists, key, bytes),
            ValueKind::Set => dec(&self.keyspace.sets, key, bytes),
            ValueKind::ZSet => dec(&self.keyspace.zsets, key, bytes),
            ValueKind::Stream => dec(&self.keyspace.streams, key, bytes),
            ValueKind::Bitmap => dec(&self.keyspace.bitmaps, key, bytes),
            ValueKind::Json => {
                let doc: serde_json::Value = serde_json::from_slice(bytes)
                    .map_err(|_| CacheError::other("corrupt snapshot record"))?;
                self.keyspace.json.load_or_store(key, || doc);
                Ok(())
            }
            ValueKind::Geo => dec(&self.keyspace.geo, key, bytes),
            ValueKind::Hll => dec(&self.keyspace.hll, key, bytes),
            ValueKind::Bloom => dec(&self.keyspace.bloom, key, bytes),
            ValueKind::Cuckoo => dec(&self.keyspace.cuckoo, key, bytes),
            ValueKind::Cms => dec(&self.keyspace.cms, key, bytes),
            ValueKind::TDigest => dec(&self.keyspace.tdigest, key, bytes),
            ValueKind::TopK => dec(&self.keyspace.topk, key, bytes),
            ValueKind::Suggest => dec(&self.keyspace.suggest, key, bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_replay_roundtrip() {
        let db = Db::new();
        db.set("s", "value".to_string()).unwrap();
        db.lpush("l", &["a".to_string(), "b".to_string()]).unwrap();
        db.hset("h", &[("f".to_string(), "v".to_string())]).unwrap();
        db.expire_key("s", Duration::from_secs(60), ExpireMode::Always);

        let records = db.snapshot();
        assert_eq!(records.len(), 3);

        let restored = Db::new();
        for record in &records {
            restored.replay(record).unwrap();
        }
        assert_eq!(restored.get("s").unwrap(), Some("value".to_string()));
        assert_eq!(restored.llen("l").unwrap(), 2);
        assert_eq!(restored.hget("h", "f").unwrap(), Some("v".to_string()));
        let ttl = restored.ttl("s");
        assert!(ttl > 0 && ttl <= 60, "ttl {}", ttl);
    }

    #[test]
    fn tombstone_replays_as_delete() {
        let db = Db::new();
        db.set("k", "v".to_string()).unwrap();
        db.replay(&SnapshotRecord::tombstone("k")).unwrap();
        assert_eq!(db.get("k").unwrap(), None);
    }
}
