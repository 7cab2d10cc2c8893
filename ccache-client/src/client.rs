//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing cache commands over
//! RESP2, routed through distinct read and write connection sub-pools.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling and protocol details.
//! 2. **Read/Write Split**: Non-mutating commands draw from the read pool,
//!    mutations from the write pool, so neither starves the other.
//! 3. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 4. **Fail Fast**: Protocol violations surface immediately as errors.

use std::fmt;
use std::time::Duration;

use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::{Decimal, RespValue};

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    Io(std::io::Error),
    /// RESP2 framing or parse error.
    Protocol,
    /// Server returned an error reply.
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    UnexpectedResponse,
    /// No connection became available before the acquire deadline.
    AcquireTimeout,
    /// Address could not be parsed into a socket address.
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {}", err),
            ClientError::Protocol => write!(f, "protocol error"),
            ClientError::Server { message } => {
                write!(f, "server error: {}", String::from_utf8_lossy(message))
            }
            ClientError::UnexpectedResponse => write!(f, "unexpected response"),
            ClientError::AcquireTimeout => write!(f, "timed out waiting for a connection"),
            ClientError::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// TTL state returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Configuration for the client and its two sub-pools.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Idle + total caps for the read sub-pool.
    pub read_max_idle: usize,
    pub read_max_total: usize,
    /// Idle + total caps for the write sub-pool.
    pub write_max_idle: usize,
    pub write_max_total: usize,
    /// How long an acquire may wait before reporting a timeout.
    pub acquire_timeout: Duration,
    /// Optional TCP timeouts shared by both sub-pools.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            read_max_idle: 8,
            read_max_total: 16,
            write_max_idle: 4,
            write_max_total: 8,
            acquire_timeout: Duration::from_secs(5),
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Synchronous client with read/write connection sub-pools.
///
/// Each call acquires a connection from the matching sub-pool, executes
/// one command, and returns the connection on drop.
pub struct CacheClient {
    reads: ConnectionPool,
    writes: ConnectionPool,
}

impl CacheClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> CacheClient {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> CacheClient {
        let pool = |max_idle: usize, max_total: usize| {
            ConnectionPool::new(PoolConfig {
                addr: config.addr.clone(),
                max_idle,
                max_total,
                acquire_timeout: config.acquire_timeout,
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                connect_timeout: config.connect_timeout,
            })
        };
        CacheClient {
            reads: pool(config.read_max_idle, config.read_max_total),
            writes: pool(config.write_max_idle, config.write_max_total),
        }
    }

    fn exec_read(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.reads.acquire()?.exec(args)
    }

    fn exec_write(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.writes.acquire()?.exec(args)
    }

    /// Fetches a value by key. `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec_read(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.exec_write(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value with an expiration.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = Decimal::from(ttl.as_secs());
        match self.exec_write(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        match self.exec_write(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Increments an integer key. Returns the new value.
    pub fn incr(&self, key: &[u8]) -> ClientResult<i64> {
        match self.exec_write(&[b"INCR", key])? {
            RespValue::Integer(value) => Ok(value),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = Decimal::from(ttl.as_secs());
        match self.exec_write(&[b"EXPIRE", key, seconds.as_bytes()])? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.exec_read(&[b"TTL", key])? {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(value) if value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the raw response payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let response = match payload {
            Some(data) => self.exec_read(&[b"PING", data])?,
            None => self.exec_read(&[b"PING"])?,
        };
        match response {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches server INFO output.
    pub fn info(&self) -> ClientResult<Vec<u8>> {
        match self.exec_read(&[b"INFO"])? {
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Escape hatch: run any command and return the decoded response.
    /// Routed through the write pool, since mutation cannot be ruled out.
    pub fn command(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.exec_write(args)
    }
}
