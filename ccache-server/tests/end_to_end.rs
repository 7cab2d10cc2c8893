//! Full-stack test: real TCP server, pooled blocking client.

use std::sync::Arc;
use std::time::Duration;

use ccache_common::ServerConfig;
use ccache_core::Db;
use ccache_server::{handle_connection, AllowAll, Metrics, ServerState};

use ccache_client::{CacheClient, ClientConfig, ClientTtl, RespValue};

/// Starts a server on an ephemeral port and returns its address.
fn spawn_server() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let state = Arc::new(ServerState::new(
                Arc::new(Db::new()),
                Arc::new(Metrics::new()),
                Arc::new(AllowAll),
                ServerConfig::default(),
            ));
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });
    });
    addr
}

#[test]
fn string_commands_over_the_wire() {
    let addr = spawn_server();
    let client = CacheClient::connect(addr);

    assert_eq!(client.ping(None).unwrap(), b"PONG");
    client.set(b"greeting", b"hello").unwrap();
    assert_eq!(client.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
    assert_eq!(client.get(b"missing").unwrap(), None);

    assert_eq!(client.incr(b"counter").unwrap(), 1);
    assert_eq!(client.incr(b"counter").unwrap(), 2);

    assert!(client.delete(b"greeting").unwrap());
    assert!(!client.delete(b"greeting").unwrap());
}

#[test]
fn ttl_lifecycle_over_the_wire() {
    let addr = spawn_server();
    let client = CacheClient::connect(addr);

    client.set(b"k", b"v").unwrap();
    assert_eq!(client.ttl(b"k").unwrap(), ClientTtl::NoExpiry);

    assert!(client.expire(b"k", Duration::from_secs(30)).unwrap());
    match client.ttl(b"k").unwrap() {
        ClientTtl::ExpiresIn(remaining) => assert!(remaining <= Duration::from_secs(30)),
        other => panic!("expected remaining ttl, got {:?}", other),
    }

    assert_eq!(client.ttl(b"missing").unwrap(), ClientTtl::Missing);
}

#[test]
fn transactions_ride_a_single_connection() {
    let addr = spawn_server();
    // One write connection: every command of the MULTI block shares the
    // server-side session, which is what transaction state needs.
    let client = CacheClient::with_config(ClientConfig {
        addr,
        write_max_idle: 1,
        write_max_total: 1,
        ..ClientConfig::default()
    });

    client.command(&[b"MULTI"]).unwrap();
    client.command(&[b"SET", b"t", b"1"]).unwrap();
    client.command(&[b"INCR", b"t"]).unwrap();
    let replies = client.command(&[b"EXEC"]).unwrap();

    match replies {
        RespValue::Array(Some(items)) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[1], RespValue::Integer(2));
        }
        other => panic!("expected exec array, got {:?}", other),
    }
    assert_eq!(
        client.command(&[b"GET", b"t"]).unwrap(),
        RespValue::Bulk(Some(b"2".to_vec()))
    );
}

#[test]
fn multi_model_commands_over_the_wire() {
    let addr = spawn_server();
    let client = CacheClient::connect(addr);

    client.command(&[b"RPUSH", b"l", b"a", b"b"]).unwrap();
    assert_eq!(
        client.command(&[b"LLEN", b"l"]).unwrap(),
        RespValue::Integer(2)
    );

    client.command(&[b"ZADD", b"z", b"1.5", b"m"]).unwrap();
    assert_eq!(
        client.command(&[b"ZSCORE", b"z", b"m"]).unwrap(),
        RespValue::Bulk(Some(b"1.5".to_vec()))
    );

    client.command(&[b"PFADD", b"p", b"x", b"y"]).unwrap();
    assert_eq!(
        client.command(&[b"PFCOUNT", b"p"]).unwrap(),
        RespValue::Integer(2)
    );

    match client.command(&[b"GET", b"l"]).unwrap() {
        RespValue::Error(message) => {
            assert!(String::from_utf8_lossy(&message).starts_with("WRONGTYPE"))
        }
        other => panic!("expected type error, got {:?}", other),
    }
}
