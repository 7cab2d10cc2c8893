//! # Connection Pool
//!
//! Purpose: Reuse TCP connections and hand them out in arrival order.
//!
//! ## Design Principles
//! 1. **Fair FIFO Waiters**: Ticketed condvar queue; a connection freed
//!    under contention always goes to the longest-waiting caller.
//! 2. **Bounded Waits**: `acquire` carries a deadline and reports a
//!    timeout instead of blocking forever.
//! 3. **Minimal Locking**: The mutex guards only pool bookkeeping; dials
//!    and I/O happen outside it.
//! 4. **Reusable Buffers**: Each connection keeps its own read/write
//!    buffers to avoid per-call allocations.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::client::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration for one sub-pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// How long `acquire` may wait for a free connection.
    pub acquire_timeout: Duration,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    /// FIFO wait queue of tickets; the front ticket is served next.
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            waiters: VecDeque::new(),
            next_ticket: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    /// Acquires a connection, waiting in FIFO order up to the configured
    /// acquire timeout.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.waiters.front() == Some(&ticket) {
                if let Some(conn) = state.idle.pop_front() {
                    state.waiters.pop_front();
                    self.inner.available.notify_all();
                    return Ok(PooledConnection::new(self.inner.clone(), conn));
                }
                if state.total < self.inner.config.max_total {
                    state.total += 1;
                    state.waiters.pop_front();
                    self.inner.available.notify_all();
                    drop(state);
                    return match Connection::connect(&self.inner.config) {
                        Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                        Err(err) => {
                            self.release_slot();
                            Err(err)
                        }
                    };
                }
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                state.waiters.retain(|t| *t != ticket);
                self.inner.available.notify_all();
                return Err(ClientError::AcquireTimeout);
            };
            let (next_state, _timeout) = self
                .inner
                .available
                .wait_timeout(state, remaining)
                .expect("pool mutex poisoned");
            state = next_state;
        }
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
        self.inner.available.notify_all();
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes a RESP command and returns the parsed response.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let conn = self.conn.as_mut().expect("connection exists");
        let response = conn.exec(args);
        if response.is_err() {
            // A broken connection must not go back into rotation.
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let mut state = self.pool.state.lock().expect("pool mutex poisoned");
        if self.valid && state.idle.len() < self.pool.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
        self.pool.available.notify_all();
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        Ok(Connection::new(dial(config)?))
    }

    fn new(stream: TcpStream) -> Connection {
        Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(64),
            write_buf: Vec::with_capacity(512),
        }
    }

    /// One request/response round trip.
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.send()?;
        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn send(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }
}

/// Dials one TCP stream and applies the pool's socket settings. A `None`
/// timeout clears the corresponding socket option, so the config values
/// pass straight through.
fn dial(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|_| ClientError::InvalidAddress)?;

    let stream = if let Some(limit) = config.connect_timeout {
        TcpStream::connect_timeout(&addr, limit)?
    } else {
        TcpStream::connect(addr)?
    };

    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    // Frames are small; Nagle only adds latency here.
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unroutable_config(max_total: usize, acquire_timeout: Duration) -> PoolConfig {
        PoolConfig {
            // TEST-NET address: connect attempts fail fast or time out.
            addr: "192.0.2.1:1".to_string(),
            max_idle: 2,
            max_total,
            acquire_timeout,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: Some(Duration::from_millis(50)),
        }
    }

    #[test]
    fn failed_dial_releases_the_slot() {
        let pool = ConnectionPool::new(unroutable_config(1, Duration::from_secs(1)));
        assert!(pool.acquire().is_err());
        // The slot must be reusable after the failed dial.
        let state = pool.inner.state.lock().unwrap();
        assert_eq!(state.total, 0);
        assert!(state.waiters.is_empty());
    }

    #[test]
    fn acquire_times_out_when_pool_is_exhausted() {
        let pool = ConnectionPool::new(unroutable_config(0, Duration::from_millis(60)));
        let started = Instant::now();
        match pool.acquire() {
            Err(ClientError::AcquireTimeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert!(started.elapsed() >= Duration::from_millis(50));
        // The abandoned ticket must not wedge the queue.
        assert!(pool.inner.state.lock().unwrap().waiters.is_empty());
    }
}
