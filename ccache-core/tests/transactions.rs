//! Cross-session transaction and concurrency behavior.

use std::sync::Arc;

use ccache_core::common::Reply;
use ccache_core::{Db, SessionId};

fn run(db: &Db, session: SessionId, line: &[&str]) -> Reply {
    let args: Vec<String> = line[1..].iter().map(|a| a.to_string()).collect();
    db.execute(session, line[0], &args)
}

#[test]
fn parallel_incr_from_many_sessions() {
    let db = Arc::new(Db::new());
    let clients = 8;
    let per_client = 200;

    let handles: Vec<_> = (0..clients)
        .map(|client| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                let session = SessionId(client as u64 + 1);
                for _ in 0..per_client {
                    let reply = run(&db, session, &["INCR", "counter"]);
                    assert!(matches!(reply, Reply::Int(_)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        run(&db, SessionId(99), &["GET", "counter"]),
        Reply::Bulk((clients * per_client).to_string())
    );
}

#[test]
fn watch_aborts_only_when_key_changed() {
    let db = Db::new();
    let (a, b) = (SessionId(1), SessionId(2));
    run(&db, a, &["SET", "k", "1"]);
    run(&db, a, &["SET", "unrelated", "1"]);

    // Unrelated writes do not abort.
    run(&db, a, &["WATCH", "k"]);
    run(&db, a, &["MULTI"]);
    run(&db, a, &["INCR", "k"]);
    run(&db, b, &["SET", "unrelated", "2"]);
    assert_eq!(
        run(&db, a, &["EXEC"]),
        Reply::Array(vec![Reply::Int(2)])
    );

    // A write to the watched key aborts.
    run(&db, a, &["WATCH", "k"]);
    run(&db, a, &["MULTI"]);
    run(&db, a, &["INCR", "k"]);
    run(&db, b, &["SET", "k", "10"]);
    assert_eq!(run(&db, a, &["EXEC"]), Reply::NullArray);
    assert_eq!(run(&db, a, &["GET", "k"]), Reply::Bulk("10".to_string()));
}

#[test]
fn watch_abort_covers_deletion_and_expiry_paths() {
    let db = Db::new();
    let (a, b) = (SessionId(1), SessionId(2));
    run(&db, a, &["SET", "k", "1"]);

    run(&db, a, &["WATCH", "k"]);
    run(&db, a, &["MULTI"]);
    run(&db, a, &["SET", "k", "2"]);
    run(&db, b, &["DEL", "k"]);
    assert_eq!(run(&db, a, &["EXEC"]), Reply::NullArray);
}

#[test]
fn exec_batches_appear_atomic_to_readers() {
    let db = Arc::new(Db::new());
    let writer = Arc::clone(&db);
    let batch = 500;

    let writer_handle = std::thread::spawn(move || {
        let session = SessionId(1);
        run(&writer, session, &["MULTI"]);
        for _ in 0..batch {
            run(&writer, session, &["INCR", "k"]);
        }
        run(&writer, session, &["EXEC"]);
    });

    // Readers must only ever observe "absent" or the full batch.
    let reader = Arc::clone(&db);
    let reader_handle = std::thread::spawn(move || {
        let session = SessionId(2);
        for _ in 0..200 {
            match run(&reader, session, &["GET", "k"]) {
                Reply::Null => {}
                Reply::Bulk(value) => {
                    assert_eq!(value, batch.to_string(), "observed partial batch");
                }
                other => panic!("unexpected reply {:?}", other),
            }
        }
    });

    writer_handle.join().unwrap();
    reader_handle.join().unwrap();
    assert_eq!(
        run(&db, SessionId(3), &["GET", "k"]),
        Reply::Bulk(batch.to_string())
    );
}

#[test]
fn discard_and_session_cleanup() {
    let db = Db::new();
    let session = SessionId(7);

    run(&db, session, &["MULTI"]);
    run(&db, session, &["SET", "k", "v"]);
    assert_eq!(run(&db, session, &["DISCARD"]), Reply::ok());
    assert_eq!(run(&db, session, &["GET", "k"]), Reply::Null);

    // Disconnect while buffering: the queue dies with the session.
    run(&db, session, &["MULTI"]);
    run(&db, session, &["SET", "k", "v"]);
    db.end_session(session);
    match run(&db, session, &["EXEC"]) {
        Reply::Error(text) => assert!(text.contains("EXEC without MULTI")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(run(&db, session, &["GET", "k"]), Reply::Null);
}

#[test]
fn queued_commands_do_not_execute_early() {
    let db = Db::new();
    let session = SessionId(1);

    run(&db, session, &["MULTI"]);
    assert_eq!(
        run(&db, session, &["SET", "k", "v"]),
        Reply::Simple("QUEUED".to_string())
    );
    // Another session sees nothing until EXEC.
    assert_eq!(run(&db, SessionId(2), &["GET", "k"]), Reply::Null);

    run(&db, session, &["EXEC"]);
    assert_eq!(
        run(&db, SessionId(2), &["GET", "k"]),
        Reply::Bulk("v".to_string())
    );
}
