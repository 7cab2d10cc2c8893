//! # Error Types
//!
//! Purpose: One library-wide error enum whose `Display` output is exactly
//! the text surfaced on the wire, so the server layer never rewrites
//! messages.
//!
//! ## Design Principles
//! 1. **Wire-Tagged Messages**: Every variant renders with its protocol tag
//!    (`ERR`, `WRONGTYPE`, `OOM`, ...).
//! 2. **Typed Where It Matters**: Control flow branches on variants, not on
//!    message text.
//! 3. **Escape Hatch**: `Other` carries structure-specific messages that no
//!    caller needs to match on.

use thiserror::Error;

/// Result type used throughout the engine.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Operation applied to a key holding another value kind.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Wrong argument count for a command.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// Malformed option or literal.
    #[error("ERR syntax error")]
    Syntax,

    /// Argument or stored value is not a decimal integer, or is out of range.
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Argument or stored value is not a parseable float.
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// Increment/decrement would leave the 64-bit range.
    #[error("ERR increment or decrement would overflow")]
    Overflow,

    /// Score arguments must be ordered, finite numbers.
    #[error("ERR value is not a valid float or is NaN")]
    NanScore,

    /// Command requires an existing key.
    #[error("ERR no such key")]
    NoSuchKey,

    /// EXEC issued outside a MULTI block.
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    /// DISCARD issued outside a MULTI block.
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    /// MULTI issued while already buffering.
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    /// WATCH must precede MULTI.
    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    /// Command name not in the dispatch table.
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Index outside the container bounds (LSET and friends).
    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// Probabilistic constructor given a rate outside (0, 1).
    #[error("ERR error rate should be between 0 and 1")]
    BadErrorRate,

    /// Cuckoo filter exhausted its eviction budget.
    #[error("ERR filter is full")]
    FilterFull,

    /// Memory ceiling reached and eviction could not reclaim enough.
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    /// Malformed stream entry id.
    #[error("ERR Invalid stream ID specified as stream command argument")]
    BadStreamId,

    /// New entry id does not advance the stream.
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    /// Consumer group already exists on the stream.
    #[error("BUSYGROUP Consumer Group name already exists")]
    BusyGroup,

    /// Consumer group does not exist.
    #[error("NOGROUP No such consumer group '{0}' for key name '{1}'")]
    NoGroup(String, String),

    /// Retrying wrapper ran past its deadline.
    #[error("ERR operation timed out")]
    Timeout,

    /// Retrying wrapper exhausted its attempt budget.
    #[error("ERR max retry attempts exceeded")]
    MaxAttempts,

    /// Structure-specific failure with a preformatted message.
    #[error("ERR {0}")]
    Other(String),
}

impl CacheError {
    /// Convenience constructor for one-off messages.
    pub fn other(message: impl Into<String>) -> Self {
        CacheError::Other(message.into())
    }
}
