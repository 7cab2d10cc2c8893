//! # Value Kind Tags
//!
//! One tag per storage family. A key holds at most one kind at a time; the
//! keyspace registry enforces that invariant with this enum.

use serde::{Deserialize, Serialize};

/// Storage family of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Str,
    Hash,
    List,
    Set,
    ZSet,
    Stream,
    Bitmap,
    Json,
    Geo,
    Hll,
    Bloom,
    Cuckoo,
    Cms,
    TDigest,
    TopK,
    Suggest,
}

impl ValueKind {
    /// Tag reported by the TYPE command.
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::Str => "string",
            ValueKind::Hash => "hash",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::ZSet => "zset",
            ValueKind::Stream => "stream",
            ValueKind::Bitmap => "bitmap",
            ValueKind::Json => "json",
            ValueKind::Geo => "geo",
            ValueKind::Hll => "hyperloglog",
            ValueKind::Bloom => "bloom",
            ValueKind::Cuckoo => "cuckoo",
            ValueKind::Cms => "cms",
            ValueKind::TDigest => "tdigest",
            ValueKind::TopK => "topk",
            ValueKind::Suggest => "suggest",
        }
    }

    /// All kinds, in snapshot order.
    pub fn all() -> &'static [ValueKind] {
        &[
            ValueKind::Str,
            ValueKind::Hash,
            ValueKind::List,
            ValueKind::Set,
            ValueKind::ZSet,
            ValueKind::Stream,
            ValueKind::Bitmap,
            ValueKind::Json,
            ValueKind::Geo,
            ValueKind::Hll,
            ValueKind::Bloom,
            ValueKind::Cuckoo,
            ValueKind::Cms,
            ValueKind::TDigest,
            ValueKind::TopK,
            ValueKind::Suggest,
        ]
    }
}
