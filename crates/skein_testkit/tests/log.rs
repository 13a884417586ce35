//! Log scenarios: cursors across files, damaged files and in-memory limits.

use skein_core::log::{file_name, HEADER_RECORD_LEN};
use skein_core::{CoreError, EncryptionKey, Lsn, TxnOptions};
use skein_testkit::prelude::*;
use std::sync::Arc;

fn small_files() -> Config {
    Config::default().log_file_size(1024)
}

fn walk(env: &TestEnv, first: CursorOp, then: CursorOp) -> Vec<Lsn> {
    let mut cursor = env.log_cursor();
    let mut out = Vec::new();
    let mut op = first;
    while let Some(record) = cursor.get(op).unwrap() {
        out.push(record.lsn);
        op = then;
    }
    out
}

#[test]
fn cursor_crosses_files_in_both_directions() {
    let env = TestEnv::shared_with(small_files());
    let lsns: Vec<Lsn> = (0..15u8)
        .map(|i| env.log_put(&[i; 150], PutFlags::NONE).unwrap())
        .collect();
    assert!(env.log().current_lsn().file >= 3);

    assert_eq!(walk(&env, CursorOp::First, CursorOp::Next), lsns);
    let mut backward = walk(&env, CursorOp::Last, CursorOp::Prev);
    backward.reverse();
    assert_eq!(backward, lsns);

    let env = env.reopen();
    assert_eq!(walk(&env, CursorOp::First, CursorOp::Next), lsns);
}

#[test]
fn set_on_a_file_start_returns_its_header() {
    let env = TestEnv::shared_with(small_files());
    for i in 0..10u8 {
        env.log_put(&[i; 150], PutFlags::NONE).unwrap();
    }
    let mut cursor = env.log_cursor();
    let header = cursor.get(CursorOp::Set(Lsn::new(2, 0))).unwrap().unwrap();
    assert_eq!(header.rectype(), RecordType::FileHeader);
    let next = cursor.get(CursorOp::Next).unwrap().unwrap();
    assert_eq!(next.lsn, Lsn::new(2, HEADER_RECORD_LEN as u32));
    let back = cursor.get(CursorOp::Prev).unwrap().unwrap();
    assert_eq!(back.lsn.file, 1);
}

#[test]
fn record_larger_than_the_buffer_straddles() {
    let env = TestEnv::shared_with(Config::default().log_buffer_size(1024));
    let before = env.log_put(b"before", PutFlags::NONE).unwrap();
    let payload: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
    let big = env.log_put(&payload, PutFlags::NONE).unwrap();
    let after = env.log_put(b"after", PutFlags::NONE).unwrap();

    let records = env.records();
    assert_eq!(
        records.iter().map(|r| r.lsn).collect::<Vec<_>>(),
        vec![before, big, after]
    );
    assert_eq!(records[1].payload, payload);

    let env = env.reopen();
    assert_eq!(env.user_payloads()[1], payload);
}

#[test]
fn in_memory_log_reports_buffer_full_while_pinned() {
    let config = Config::default()
        .in_memory(true)
        .log_buffer_size(4096)
        .log_file_size(1024);
    let env = TestEnv::memory_with(config);
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    let first = env.txn_put(&txn, b"pinned").unwrap();

    let mut err = None;
    for i in 0..64u8 {
        if let Err(e) = env.log_put(&[i; 200], PutFlags::NONE) {
            err = Some(e);
            break;
        }
    }
    assert!(matches!(err, Some(CoreError::BufferFull { .. })));
    assert!(!env.is_panicked());
    assert_eq!(env.log_stat().buffer_full, 1);

    let mut cursor = env.log_cursor();
    let record = cursor.get(CursorOp::Set(first)).unwrap().unwrap();
    assert_eq!(record.payload, b"pinned");
}

#[test]
fn in_memory_log_reclaims_when_idle() {
    let config = Config::default()
        .in_memory(true)
        .log_buffer_size(4096)
        .log_file_size(1024);
    let env = TestEnv::memory_with(config);
    for i in 0..200u8 {
        env.log_put(&[i; 200], PutFlags::NONE).unwrap();
    }
    let payloads = env.user_payloads();
    assert!(!payloads.is_empty());
    assert!(payloads.len() < 200);
    assert_eq!(payloads.last().unwrap(), &vec![199u8; 200]);
}

#[test]
fn record_too_large_for_a_file() {
    let env = TestEnv::shared_with(small_files());
    assert!(matches!(
        env.log_put(&[0; 2000], PutFlags::NONE),
        Err(CoreError::RecordTooLarge { .. })
    ));
    assert!(!env.is_panicked());
}

#[test]
fn checksum_failure_panics_unless_silent() {
    let env = TestEnv::shared();
    let a = env.log_put(b"good", PutFlags::NONE).unwrap();
    env.log_put(b"also good", PutFlags::NONE).unwrap();
    let env = env.reopen();
    corrupt_record(env.directory().unwrap(), a);

    let mut silent = env.log_cursor().silent();
    assert!(silent.get(CursorOp::Set(a)).unwrap().is_none());
    assert!(!env.is_panicked());

    let mut cursor = env.log_cursor();
    assert!(matches!(
        cursor.get(CursorOp::Set(a)),
        Err(CoreError::ChecksumMismatch { .. })
    ));
    assert!(env.is_panicked());
    assert!(matches!(
        env.txn_begin(None, TxnOptions::new()),
        Err(CoreError::RunRecovery { .. })
    ));
}

#[test]
fn torn_tail_is_cut_off_on_open() {
    let env = TestEnv::shared();
    env.log_put(b"kept", PutFlags::NONE).unwrap();
    let torn = env.log_put(&[7; 300], PutFlags::SYNC).unwrap();
    tear_record(env.directory().unwrap(), torn);

    let env = env.crash();
    assert_eq!(env.log().current_lsn(), torn);
    assert_eq!(env.user_payloads(), vec![b"kept".to_vec()]);
    let next = env.log_put(b"next", PutFlags::SYNC).unwrap();
    assert_eq!(next, torn);
}

#[test]
fn garbage_after_the_last_record_is_cut_off() {
    let env = TestEnv::shared();
    env.log_put(b"kept", PutFlags::SYNC).unwrap();
    let end = env.log().current_lsn();
    append_garbage(env.directory().unwrap(), end.file, &[0xff; 40]);

    let env = env.crash();
    assert_eq!(env.log().current_lsn(), end);
    assert_eq!(
        file_len(env.directory().unwrap(), end.file),
        u64::from(end.offset)
    );
}

#[test]
fn blank_last_file_is_reinitialized() {
    let env = TestEnv::shared();
    let kept = env.log_put(b"kept", PutFlags::SYNC).unwrap();
    blank_file(env.directory().unwrap(), 2, 30);

    let env = env.crash();
    assert_eq!(env.log().current_lsn(), Lsn::new(2, HEADER_RECORD_LEN as u32));
    let next = env.log_put(b"next", PutFlags::NONE).unwrap();
    assert_eq!(next.file, 2);

    let mut cursor = env.log_cursor();
    assert_eq!(cursor.get(CursorOp::Set(next)).unwrap().unwrap().payload, b"next");
    assert_eq!(cursor.get(CursorOp::Prev).unwrap().unwrap().lsn, kept);
}

#[test]
fn damaged_last_header_refuses_to_open() {
    let env = TestEnv::shared();
    env.log_put(b"x", PutFlags::SYNC).unwrap();
    let dir = Arc::clone(env.directory().unwrap());
    drop(env);
    damage_header(&dir, 1);

    let err = skein_core::Environment::open_with_directory(Config::default(), dir).unwrap_err();
    assert!(matches!(err, CoreError::Corruption { .. }));
}

#[test]
fn file_names_are_ten_digits() {
    let env = TestEnv::shared_with(small_files());
    for i in 0..10u8 {
        env.log_put(&[i; 150], PutFlags::NONE).unwrap();
    }
    env.log_flush(None).unwrap();
    let dir = env.directory().unwrap();
    assert!(dir.file(&file_name(1)).is_some());
    assert!(dir.file("log.0000000002").is_some());
}

#[test]
fn encrypted_log_reads_back_after_reopen() {
    let key = EncryptionKey::from_bytes(&[0x5a; 32]).unwrap();
    let env = TestEnv::shared_with(small_files().with_encryption_key(key));
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    let a = env.txn_put(&txn, b"secret payload one").unwrap();
    env.txn_put(&txn, b"secret payload two").unwrap();
    env.txn_commit(&txn, None).unwrap();
    for i in 0..8u8 {
        env.log_put(&[i; 150], PutFlags::NONE).unwrap();
    }
    assert!(env.log().current_lsn().file >= 2);
    let dir = Arc::clone(env.directory().unwrap());

    let env = env.reopen();
    let records = env.records();
    assert!(records.iter().all(|r| r.header.is_encrypted()));
    assert_eq!(records[0].lsn, a);
    assert_eq!(records[0].payload, b"secret payload one");
    assert_eq!(records[1].payload, b"secret payload two");
    assert_eq!(records[1].header.prev_lsn, a);
    assert_eq!(records[2].rectype(), RecordType::Commit);
    assert_eq!(env.user_payloads().len(), 10);

    let raw = dir.file(&file_name(1)).unwrap().data();
    assert!(!raw.windows(14).any(|w| w == b"secret payload"));

    let mut cursor = env.log_cursor();
    let last = cursor.get(CursorOp::Last).unwrap().unwrap();
    assert_eq!(last.payload, vec![7; 150]);
    let prev = cursor.get(CursorOp::Prev).unwrap().unwrap();
    assert_eq!(prev.payload, vec![6; 150]);

    assert!(matches!(
        Environment::open_with_directory(Config::default(), dir),
        Err(CoreError::Config { .. })
    ));
}
