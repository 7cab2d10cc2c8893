//! # CrystalCache Sync Client
//!
//! Provide a lightweight, blocking RESP2 client with pooled connections.
//! Reads and writes draw from distinct sub-pools with fair FIFO waiters,
//! so a burst of slow writes cannot starve cheap reads of connections.

mod client;
mod pool;
mod resp;

pub use client::{CacheClient, ClientConfig, ClientError, ClientResult, ClientTtl};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use resp::RespValue;
