//! # TCP Server
//!
//! Accept RESP2 connections, frame commands, and dispatch them to the
//! cache core. Each connection gets its own `SessionId`; disconnects
//! discard any pending MULTI queue and clear watches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use ccache_common::{Reply, ServerConfig};
use ccache_core::{Db, SessionId};

use crate::acl::AclCheck;
use crate::metrics::Metrics;
use crate::resp::{encode_reply, RespError, RespParser};

/// Shared state handed to every connection task.
pub struct ServerState {
    pub db: Arc<Db>,
    pub metrics: Arc<Metrics>,
    pub acl: Arc<dyn AclCheck>,
    next_session: AtomicU64,
    config: ServerConfig,
}

impl ServerState {
    pub fn new(db: Arc<Db>, metrics: Arc<Metrics>, acl: Arc<dyn AclCheck>, config: ServerConfig) -> Self {
        ServerState {
            db,
            metrics,
            acl,
            next_session: AtomicU64::new(1),
            config,
        }
    }

    fn allocate_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }
}

/// Binds the listen address and serves connections until the task is
/// cancelled.
pub async fn serve(state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&state.config.addr).await?;
    info!(addr = %state.config.addr, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            if let Err(err) = handle_connection(stream, state).await {
                warn!(%peer, %err, "connection ended with error");
            }
        });
    }
}

/// Handles a single TCP client connection. The session is always cleaned
/// up on exit: any pending MULTI queue is discarded and watches cleared.
pub async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let session = state.allocate_session();
    let result = connection_loop(&mut stream, &state, session).await;
    state.db.end_session(session);
    result
}

async fn connection_loop(
    stream: &mut TcpStream,
    state: &ServerState,
    session: SessionId,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(state.config.read_buffer);
    let mut parser = RespParser::new();
    let mut out = Vec::with_capacity(256);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(frame)) => {
                    let reply = run_command(state, session, frame);
                    out.clear();
                    encode_reply(&reply, &mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    let reply = Reply::Error("ERR Protocol error".to_string());
                    out.clear();
                    encode_reply(&reply, &mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }
    }
}

fn run_command(state: &ServerState, session: SessionId, frame: Vec<Vec<u8>>) -> Reply {
    let started = Instant::now();
    state.metrics.record_request_start();

    let reply = dispatch_frame(state, session, frame);
    if reply.is_error() {
        state.metrics.record_error();
    }
    state.metrics.record_request_end(started.elapsed());
    reply
}

fn dispatch_frame(state: &ServerState, session: SessionId, frame: Vec<Vec<u8>>) -> Reply {
    if frame.is_empty() {
        return Reply::Error("ERR empty command".to_string());
    }

    let mut parts = Vec::with_capacity(frame.len());
    for arg in frame {
        match String::from_utf8(arg) {
            Ok(text) => parts.push(text),
            Err(_) => return Reply::Error("ERR invalid argument encoding".to_string()),
        }
    }
    let name = parts.remove(0);

    // Keys for the ACL verdict: everything up to the first option-looking
    // token is a reasonable approximation for this command surface.
    if !state.acl.check("default", &name.to_ascii_uppercase(), &parts) {
        return Reply::Error("NOPERM this user has no permissions to run this command".to_string());
    }

    state.db.execute(session, &name, &parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AllowAll;

    fn state() -> Arc<ServerState> {
        ServerState::new(
            Arc::new(Db::new()),
            Arc::new(Metrics::new()),
            Arc::new(AllowAll),
            ServerConfig::default(),
        )
        .into()
    }

    fn frame(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn frames_dispatch_to_the_core() {
        let state = state();
        let session = state.allocate_session();

        assert_eq!(
            dispatch_frame(&state, session, frame(&["SET", "k", "v"])),
            Reply::ok()
        );
        assert_eq!(
            dispatch_frame(&state, session, frame(&["GET", "k"])),
            Reply::Bulk("v".to_string())
        );
    }

    #[test]
    fn non_utf8_arguments_are_rejected() {
        let state = state();
        let session = state.allocate_session();
        let reply = dispatch_frame(
            &state,
            session,
            vec![b"SET".to_vec(), vec![0xff, 0xfe], b"v".to_vec()],
        );
        match reply {
            Reply::Error(text) => assert!(text.contains("encoding")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn metrics_count_requests_and_errors() {
        let state = state();
        let session = state.allocate_session();
        run_command(&state, session, frame(&["PING"]));
        run_command(&state, session, frame(&["BOGUS"]));

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.inflight, 0);
        assert_eq!(snapshot.latency.samples, 2);
    }

    struct DenyAll;
    impl AclCheck for DenyAll {
        fn check(&self, _: &str, _: &str, _: &[String]) -> bool {
            false
        }
    }

    #[test]
    fn acl_verdict_is_honoured() {
        let state: Arc<ServerState> = ServerState::new(
            Arc::new(Db::new()),
            Arc::new(Metrics::new()),
            Arc::new(DenyAll),
            ServerConfig::default(),
        )
        .into();
        let session = state.allocate_session();
        match dispatch_frame(&state, session, frame(&["GET", "k"])) {
            Reply::Error(text) => assert!(text.starts_with("NOPERM")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn end_to_end_over_tcp() {
        let state = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, accept_state).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n$1\r\nv\r\n";
        let mut response = vec![0u8; 64];
        let mut filled = 0;
        while filled < expected.len() {
            let n = client.read(&mut response[filled..]).await.unwrap();
            if n == 0 {
                break;
            }
            filled += n;
        }
        assert_eq!(&response[..filled], expected);
    }
}
