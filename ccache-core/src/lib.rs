//! # CrystalCache Core
//!
//! The typed concurrent keyspace and its per-type engines: sharded storage,
//! TTL lifecycle, optimistic concurrency for transactions, probabilistic
//! structures, and the `execute` entry point the wire layer dispatches into.
//!
//! ## Structure Overview
//!
//! ```text
//! Db
//!   ├── keyspace: Keyspace          (ValueKind tags + one TypedShard per kind)
//!   ├── versions: VersionRegistry   (key -> u64, bumped on every mutation)
//!   ├── expirations: ExpirationIndex (key -> deadline, lazy + swept)
//!   ├── sessions: SessionRegistry   (MULTI queues and WATCH sets)
//!   ├── patterns: PatternMatcher    (compiled glob cache)
//!   ├── stats: Stats                (counters for INFO / MEMORY STATS)
//!   └── barrier: RwLock<()>         (read = foreground op, write = EXEC)
//! ```

mod db;
mod engines;
mod execute;
mod expire;
mod keyspace;
mod memory;
mod pattern;
mod prob;
mod retry;
mod shard;
mod snapshot;
mod txn;
mod version;

pub use db::{Db, MutationSink, StatField, TaskHandle};
pub use expire::ExpireMode;
pub use memory::MemoryReport;
pub use pattern::PatternMatcher;
pub use retry::{Retry, RetryError, RetryPolicy};
pub use snapshot::SnapshotRecord;
pub use txn::SessionId;

pub use ccache_common as common;
