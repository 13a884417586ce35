//! Transaction scenarios run through the environment facade.

use skein_core::{
    CoreError, Environment, LockCollaborator, RecordType, Txn, TxnId, TxnOptions, TxnRecord,
    TxnStatus, UndoHandler, TXN_MINIMUM,
};
use skein_testkit::prelude::*;
use std::sync::Arc;

fn recorder(env: &Environment) -> Arc<RecordingUndo> {
    let undo = Arc::new(RecordingUndo::new());
    env.set_undo_handler(Arc::clone(&undo) as Arc<dyn UndoHandler>);
    undo
}

fn types(env: &TestEnv) -> Vec<RecordType> {
    env.records().iter().map(LogRecord::rectype).collect()
}

#[test]
fn committed_records_replay_in_order() {
    let env = TestEnv::memory();
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    let a = env.txn_put(&txn, b"A").unwrap();
    let b = env.txn_put(&txn, b"B").unwrap();
    env.txn_commit(&txn, None).unwrap();

    let records = env.records();
    assert_eq!(types(&env), vec![RecordType::User, RecordType::User, RecordType::Commit]);
    assert_eq!(records[0].payload, b"A");
    assert_eq!(records[1].payload, b"B");
    assert_eq!(records[1].header.prev_lsn, a);
    assert_eq!(records[2].header.prev_lsn, b);
    assert!(records.iter().all(|r| r.header.txnid == txn.id()));
    assert!(matches!(
        TxnRecord::decode(RecordType::Commit, records[2].lsn, &records[2].payload).unwrap(),
        TxnRecord::Commit { .. }
    ));
}

#[test]
fn abort_undoes_each_record_once() {
    let env = TestEnv::memory();
    let undo = recorder(&env);
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&txn, b"X").unwrap();
    env.txn_abort(&txn).unwrap();

    assert_eq!(undo.payloads(), vec![b"X".to_vec()]);
    assert_eq!(types(&env), vec![RecordType::User, RecordType::Abort]);
    assert!(matches!(
        env.txn_commit(&txn, None),
        Err(CoreError::InvalidState { .. })
    ));
    assert!(matches!(env.txn_abort(&txn), Err(CoreError::InvalidState { .. })));
    assert_eq!(undo.calls().len(), 1);
}

#[test]
fn parent_abort_walks_spliced_child_chain() {
    let env = TestEnv::memory();
    let undo = recorder(&env);
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&parent, b"p1").unwrap();
    let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    env.txn_put(&child, b"c1").unwrap();
    env.txn_put(&child, b"c2").unwrap();
    env.txn_commit(&child, None).unwrap();
    env.txn_put(&parent, b"p2").unwrap();
    env.txn_abort(&parent).unwrap();

    assert_eq!(
        undo.payloads(),
        vec![b"p2".to_vec(), b"c2".to_vec(), b"c1".to_vec(), b"p1".to_vec()]
    );
    let calls = undo.calls();
    assert_eq!(calls[1].txnid, child.id());
    assert_eq!(calls[0].txnid, parent.id());
}

#[test]
fn child_commit_is_logged_on_the_parent_chain() {
    let env = TestEnv::memory();
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    let c1 = env.txn_put(&child, b"c1").unwrap();
    env.txn_commit(&child, None).unwrap();
    env.txn_commit(&parent, None).unwrap();

    let records = env.records();
    let splice = records
        .iter()
        .find(|r| r.rectype() == RecordType::ChildCommit)
        .unwrap();
    assert_eq!(splice.header.txnid, parent.id());
    assert_eq!(
        TxnRecord::decode(splice.rectype(), splice.lsn, &splice.payload).unwrap(),
        TxnRecord::ChildCommit {
            child: child.id(),
            child_last_lsn: c1
        }
    );
    let commit = records.last().unwrap();
    assert_eq!(commit.rectype(), RecordType::Commit);
    assert_eq!(commit.header.prev_lsn, splice.lsn);
}

#[test]
fn aborted_child_is_not_undone_again_by_parent() {
    let env = TestEnv::memory();
    let undo = recorder(&env);
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&parent, b"p").unwrap();
    let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    env.txn_put(&child, b"c").unwrap();
    env.txn_abort(&child).unwrap();
    assert_eq!(undo.payloads(), vec![b"c".to_vec()]);

    env.txn_abort(&parent).unwrap();
    assert_eq!(undo.payloads(), vec![b"c".to_vec(), b"p".to_vec()]);
}

#[test]
fn prepare_twice_is_rejected() {
    let env = TestEnv::memory();
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&txn, b"work").unwrap();
    env.txn_prepare(&txn, b"gid-1").unwrap();
    assert!(matches!(
        env.txn_prepare(&txn, b"gid-1"),
        Err(CoreError::InvalidState { .. })
    ));
    assert!(matches!(
        env.txn_put(&txn, b"late"),
        Err(CoreError::InvalidState { .. })
    ));

    let prepared = env.txn_prepared();
    assert_eq!(prepared.len(), 1);
    assert_eq!(prepared[0].xid.as_bytes(), b"gid-1");

    env.txn_commit(&prepared[0].txn, None).unwrap();
    assert_eq!(
        types(&env),
        vec![RecordType::User, RecordType::Prepare, RecordType::Commit]
    );
    assert!(env.txn_prepared().is_empty());
}

#[test]
fn prepare_needs_a_usable_gid_and_a_root() {
    let env = TestEnv::memory();
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    assert!(matches!(
        env.txn_prepare(&parent, b""),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(matches!(
        env.txn_prepare(&parent, &[1; 129]),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(matches!(
        env.txn_prepare(&child, b"gid"),
        Err(CoreError::InvalidState { .. })
    ));
}

#[test]
fn close_leaves_prepared_transactions_alone() {
    let env = TestEnv::memory();
    let undo = recorder(&env);
    let prepared = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&prepared, b"in doubt").unwrap();
    env.txn_prepare(&prepared, b"xa").unwrap();
    let running = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&running, b"unfinished").unwrap();
    env.close().unwrap();

    assert_eq!(undo.payloads(), vec![b"unfinished".to_vec()]);
    let aborts: Vec<TxnId> = env
        .records()
        .iter()
        .filter(|r| r.rectype() == RecordType::Abort)
        .map(|r| r.header.txnid)
        .collect();
    assert_eq!(aborts, vec![running.id()]);
}

#[test]
fn undo_failure_panics_the_environment() {
    let env = TestEnv::memory();
    env.set_undo_handler(Arc::new(RecordingUndo::failing_on(b"stuck")) as Arc<dyn UndoHandler>);
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&txn, b"stuck").unwrap();

    assert!(matches!(env.txn_abort(&txn), Err(CoreError::RunRecovery { .. })));
    assert!(env.is_panicked());
    assert!(env.panic_reason().unwrap().contains("undo"));
    assert!(matches!(
        env.txn_begin(None, TxnOptions::new()),
        Err(CoreError::RunRecovery { .. })
    ));
    assert!(matches!(
        env.log_put(b"x", PutFlags::NONE),
        Err(CoreError::RunRecovery { .. })
    ));
}

#[test]
fn locks_are_released_at_resolution() {
    let env = TestEnv::memory();
    let locks = Arc::new(RecordingLocks::new());
    env.set_lock_collaborator(Arc::clone(&locks) as Arc<dyn LockCollaborator>);

    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    env.txn_put(&child, b"c").unwrap();
    env.txn_commit(&parent, None).unwrap();

    assert_eq!(
        locks.events(),
        vec![
            LockEvent::All(child.id()),
            LockEvent::ReadLocks(parent.id()),
            LockEvent::All(parent.id()),
        ]
    );
}

#[test]
fn failed_read_lock_release_aborts_the_commit() {
    let env = TestEnv::memory();
    let undo = recorder(&env);
    env.set_lock_collaborator(
        Arc::new(RecordingLocks::refusing_read_release()) as Arc<dyn LockCollaborator>
    );
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&txn, b"w").unwrap();

    assert!(matches!(
        env.txn_commit(&txn, None),
        Err(CoreError::InvalidState { .. })
    ));
    assert_eq!(undo.payloads(), vec![b"w".to_vec()]);
    assert_eq!(types(&env), vec![RecordType::User, RecordType::Abort]);
    assert!(!env.is_panicked());
}

#[test]
fn ids_are_recycled_once_the_window_is_used() {
    let env = TestEnv::memory_with(Config::memory().txn_id_window(3));
    let a = env.txn_begin(None, TxnOptions::new()).unwrap();
    let b = env.txn_begin(None, TxnOptions::new()).unwrap();
    let c = env.txn_begin(None, TxnOptions::new()).unwrap();
    assert_eq!(a.id(), TxnId::new(TXN_MINIMUM));
    assert_eq!(c.id(), TxnId::new(TXN_MINIMUM + 2));
    assert!(matches!(
        env.txn_begin(None, TxnOptions::new()),
        Err(CoreError::TxnIdSpaceExhausted)
    ));

    env.txn_commit(&b, None).unwrap();
    let d = env.txn_begin(None, TxnOptions::new()).unwrap();
    assert_eq!(d.id(), b.id());
    assert_eq!(env.txn_stat().recycles, 1);

    let recycle = env
        .records()
        .into_iter()
        .find(|r| r.rectype() == RecordType::TxnRecycle)
        .unwrap();
    assert_eq!(recycle.header.txnid, TxnId::NONE);
    assert_eq!(
        TxnRecord::decode(recycle.rectype(), recycle.lsn, &recycle.payload).unwrap(),
        TxnRecord::TxnRecycle {
            min: TXN_MINIMUM + 1,
            max: TXN_MINIMUM + 1
        }
    );
}

#[test]
fn recovery_mode_admits_compensating_transactions() {
    let env = TestEnv::memory();
    env.set_recovering(true);
    let plain = env.txn_begin(None, TxnOptions::new()).unwrap();
    assert!(matches!(
        env.txn_put(&plain, b"no"),
        Err(CoreError::InvalidState { .. })
    ));
    let clr = env
        .txn_begin(None, TxnOptions::new().compensating())
        .unwrap();
    env.txn_put(&clr, b"yes").unwrap();
    env.txn_commit(&clr, None).unwrap();
    env.set_recovering(false);
    env.txn_put(&plain, b"now").unwrap();
    env.txn_commit(&plain, None).unwrap();
    assert_eq!(env.user_payloads(), vec![b"yes".to_vec(), b"now".to_vec()]);
}

#[test]
fn checkpoint_survives_reopen_and_gates_archiving() {
    let env = TestEnv::shared_with(Config::default().log_file_size(1024));
    for i in 0..20u8 {
        env.log_put(&[i; 150], PutFlags::NONE).unwrap();
    }
    assert!(env.archive(false).unwrap().is_empty());

    let ckp = env.txn_checkpoint().unwrap();
    let archivable = env.archive(false).unwrap();
    assert!(!archivable.is_empty());
    assert!(archivable.iter().all(|&seq| seq < ckp.file));

    let env = env.reopen();
    assert_eq!(env.txn_stat().last_checkpoint, ckp);
    assert_eq!(env.archive(true).unwrap(), archivable);
    let dir = env.directory().unwrap();
    for seq in archivable {
        assert!(dir.file(&skein_core::log::file_name(seq)).is_none());
    }
}

fn tight_memory() -> Config {
    Config::default()
        .in_memory(true)
        .log_buffer_size(8192)
        .log_file_size(4096)
}

/// Logs small records on `txn` until the in-memory buffer refuses one.
fn fill(env: &TestEnv, txn: &Txn) -> usize {
    for n in 0..10_000 {
        match env.txn_put(txn, &[7; 8]) {
            Ok(_) => {}
            Err(CoreError::BufferFull { .. }) => return n,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    panic!("buffer never filled");
}

#[test]
fn abort_succeeds_after_in_memory_buffer_full() {
    let env = TestEnv::memory_with(tight_memory());
    let undo = recorder(&env);
    let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
    let logged = fill(&env, &txn);
    assert!(logged > 0);
    assert!(!env.is_panicked());

    env.txn_abort(&txn).unwrap();
    assert!(!env.is_panicked());
    assert_eq!(undo.calls().len(), logged);
    assert_eq!(env.txn_stat().active, 0);
    let last = env.log_cursor().get(CursorOp::Last).unwrap().unwrap();
    assert_eq!(last.rectype(), RecordType::Abort);
    assert_eq!(last.header.txnid, txn.id());

    let next = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&next, b"after").unwrap();
    env.txn_commit(&next, None).unwrap();
}

#[test]
fn failed_child_commit_aborts_the_family() {
    let env = TestEnv::memory_with(tight_memory());
    let undo = recorder(&env);
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&parent, b"p1").unwrap();
    let first = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    env.txn_put(&first, b"c1").unwrap();
    let second = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    let filled = fill(&env, &second);

    // The first child's splice record no longer fits.
    assert!(matches!(
        env.txn_commit(&parent, None),
        Err(CoreError::BufferFull { .. })
    ));
    assert!(!env.is_panicked());

    let payloads = undo.payloads();
    assert_eq!(payloads.len(), filled + 2);
    assert_eq!(payloads.first(), Some(&b"c1".to_vec()));
    assert_eq!(payloads.last(), Some(&b"p1".to_vec()));
    for txn in [&parent, &first, &second] {
        assert!(matches!(env.txn_info(txn), Err(CoreError::InvalidState { .. })));
    }
    assert_eq!(env.txn_stat().active, 0);
    assert_eq!(env.txn_stat().commits, 0);
    let last = env.log_cursor().get(CursorOp::Last).unwrap().unwrap();
    assert_eq!(last.rectype(), RecordType::Abort);
    assert_eq!(last.header.txnid, parent.id());
}

#[test]
fn failed_child_commit_during_prepare_leaves_parent_running() {
    let env = TestEnv::memory_with(tight_memory());
    let undo = recorder(&env);
    let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
    env.txn_put(&parent, b"p1").unwrap();
    let first = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    env.txn_put(&first, b"c1").unwrap();
    let second = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
    let filled = fill(&env, &second);

    assert!(matches!(
        env.txn_prepare(&parent, b"gid-1"),
        Err(CoreError::BufferFull { .. })
    ));
    assert!(!env.is_panicked());
    assert_eq!(undo.calls().len(), filled + 1);
    assert!(env.txn_prepared().is_empty());
    assert!(matches!(env.txn_info(&first), Err(CoreError::InvalidState { .. })));
    assert!(matches!(env.txn_info(&second), Err(CoreError::InvalidState { .. })));
    let info = env.txn_info(&parent).unwrap();
    assert_eq!(info.status, TxnStatus::Running);
    assert_eq!(env.txn_stat().active, 1);

    env.txn_abort(&parent).unwrap();
    assert_eq!(undo.payloads().last(), Some(&b"p1".to_vec()));
    assert_eq!(env.txn_stat().active, 0);
}
