//! Cross-engine keyspace behavior: type exclusivity, emptiness purges,
//! persistence records, and the background task handles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccache_core::common::Reply;
use ccache_core::{Db, MutationSink, SessionId, SnapshotRecord};

fn run(db: &Db, line: &[&str]) -> Reply {
    let args: Vec<String> = line[1..].iter().map(|a| a.to_string()).collect();
    db.execute(SessionId(1), line[0], &args)
}

#[test]
fn a_key_never_holds_two_kinds() {
    let db = Db::new();
    run(&db, &["LPUSH", "k", "x"]);

    for denied in [
        vec!["SADD", "k", "m"],
        vec!["HSET", "k", "f", "v"],
        vec!["ZADD", "k", "1", "m"],
        vec!["XADD", "k", "*", "f", "v"],
        vec!["SETBIT", "k", "0", "1"],
        vec!["PFADD", "k", "x"],
        vec!["GEOADD", "k", "0", "0", "m"],
    ] {
        match run(&db, &denied) {
            Reply::Error(text) => assert!(text.starts_with("WRONGTYPE"), "{:?}", denied),
            other => panic!("{:?} should be a type error, got {:?}", denied, other),
        }
    }
    assert_eq!(
        run(&db, &["TYPE", "k"]),
        Reply::Simple("list".to_string())
    );
}

#[test]
fn empty_containers_disappear_from_keys() {
    let db = Db::new();
    run(&db, &["RPUSH", "l", "a"]);
    run(&db, &["SADD", "s", "a"]);
    run(&db, &["HSET", "h", "f", "v"]);
    run(&db, &["ZADD", "z", "1", "m"]);
    assert_eq!(run(&db, &["DBSIZE"]), Reply::Int(4));

    run(&db, &["LPOP", "l"]);
    run(&db, &["SREM", "s", "a"]);
    run(&db, &["HDEL", "h", "f"]);
    run(&db, &["ZREM", "z", "m"]);

    assert_eq!(run(&db, &["KEYS", "*"]), Reply::Array(vec![]));
    assert_eq!(run(&db, &["DBSIZE"]), Reply::Int(0));
}

struct RecordingSink {
    records: Mutex<Vec<SnapshotRecord>>,
}

impl MutationSink for RecordingSink {
    fn write(&self, record: &SnapshotRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[test]
fn mutation_sink_sees_every_write() {
    let db = Db::new();
    let sink = Arc::new(RecordingSink {
        records: Mutex::new(Vec::new()),
    });
    db.set_mutation_sink(Some(sink.clone()));

    run(&db, &["SET", "k", "v"]);
    run(&db, &["LPUSH", "l", "a"]);
    run(&db, &["DEL", "k"]);
    // Reads emit nothing.
    run(&db, &["GET", "missing"]);
    run(&db, &["LRANGE", "l", "0", "-1"]);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].key, "k");
    assert!(records[0].body.is_some());
    assert_eq!(records[1].key, "l");
    // The delete arrives as a tombstone.
    assert_eq!(records[2].key, "k");
    assert!(records[2].body.is_none());
}

#[test]
fn snapshot_restores_a_mixed_keyspace() {
    let db = Db::new();
    run(&db, &["SET", "s", "text"]);
    run(&db, &["RPUSH", "l", "a", "b"]);
    run(&db, &["ZADD", "z", "1.5", "m"]);
    run(&db, &["JSON.SET", "j", "$", r#"{"a":1}"#]);
    run(&db, &["PFADD", "p", "x", "y"]);
    run(&db, &["XADD", "st", "1-1", "f", "v"]);

    let records = db.snapshot();
    let restored = Db::new();
    for record in &records {
        restored.replay(record).unwrap();
    }

    assert_eq!(run(&restored, &["GET", "s"]), Reply::Bulk("text".to_string()));
    assert_eq!(run(&restored, &["LLEN", "l"]), Reply::Int(2));
    assert_eq!(
        run(&restored, &["ZSCORE", "z", "m"]),
        Reply::Bulk("1.5".to_string())
    );
    assert_eq!(
        run(&restored, &["JSON.GET", "j", "$.a"]),
        Reply::Bulk("1".to_string())
    );
    assert_eq!(run(&restored, &["PFCOUNT", "p"]), Reply::Int(2));
    assert_eq!(run(&restored, &["XLEN", "st"]), Reply::Int(1));
}

#[test]
fn sweeper_task_runs_in_background() {
    let db = Arc::new(Db::new());
    run(&db, &["SET", "doomed", "v"]);
    run(&db, &["PEXPIRE", "doomed", "20"]);

    let handle = db.start_sweeper(Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(120));
    handle.stop();

    // The sweeper, not a lazy read, removed the key.
    assert_eq!(db.stat(ccache_core::StatField::ExpiredKeys), 1);
    assert_eq!(run(&db, &["EXISTS", "doomed"]), Reply::Int(0));
}

#[test]
fn rename_and_randomkey() {
    let db = Db::new();
    run(&db, &["SET", "old", "v"]);
    assert_eq!(run(&db, &["RENAME", "old", "new"]), Reply::ok());
    assert_eq!(run(&db, &["GET", "new"]), Reply::Bulk("v".to_string()));

    match run(&db, &["RANDOMKEY"]) {
        Reply::Bulk(key) => assert_eq!(key, "new"),
        other => panic!("expected bulk, got {:?}", other),
    }

    match run(&db, &["RENAME", "ghost", "x"]) {
        Reply::Error(text) => assert!(text.contains("no such key")),
        other => panic!("expected error, got {:?}", other),
    }
}
