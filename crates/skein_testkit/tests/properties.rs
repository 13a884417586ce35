//! Property tests over random record streams and transaction plans.

use proptest::prelude::*;
use skein_core::{TxnOptions, UndoHandler};
use skein_testkit::prelude::*;
use std::sync::Arc;

fn small_files() -> Config {
    Config::default().log_file_size(2048).log_buffer_size(4096)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn lsns_increase_and_replay_matches(
        puts in prop::collection::vec((payload_strategy(), put_flags_strategy()), 1..40)
    ) {
        let env = TestEnv::shared_with(small_files());
        let mut lsns = Vec::new();
        for (payload, flags) in &puts {
            lsns.push(env.log_put(payload, *flags).unwrap());
        }
        prop_assert!(lsns.windows(2).all(|w| w[0] < w[1]));

        let expected: Vec<Vec<u8>> = puts.into_iter().map(|(p, _)| p).collect();
        prop_assert_eq!(env.user_payloads(), expected.clone());

        let env = env.reopen();
        let records = env.records();
        prop_assert_eq!(records.iter().map(|r| r.lsn).collect::<Vec<_>>(), lsns);
        prop_assert_eq!(env.user_payloads(), expected);
    }

    #[test]
    fn synced_records_survive_a_crash(
        payloads in payloads_strategy(20),
        unsynced in payloads_strategy(5),
    ) {
        let env = TestEnv::shared_with(small_files());
        let last = payloads.len() - 1;
        for (i, payload) in payloads.iter().enumerate() {
            let flags = if i == last { PutFlags::SYNC } else { PutFlags::NONE };
            env.log_put(payload, flags).unwrap();
        }
        for payload in &unsynced {
            env.log_put(payload, PutFlags::NONE).unwrap();
        }

        let env = env.crash();
        let survived = env.user_payloads();
        prop_assert!(survived.len() >= payloads.len());
        prop_assert_eq!(&survived[..payloads.len()], &payloads[..]);
    }

    #[test]
    fn top_level_plans_undo_exactly_aborted_work(
        plans in prop::collection::vec(txn_plan_strategy(), 1..6)
    ) {
        let env = TestEnv::memory();
        let undo = Arc::new(RecordingUndo::new());
        env.set_undo_handler(Arc::clone(&undo) as Arc<dyn UndoHandler>);

        let mut expected = Vec::new();
        for plan in &plans {
            let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
            for payload in &plan.payloads {
                env.txn_put(&txn, payload).unwrap();
            }
            if plan.commit {
                env.txn_commit(&txn, None).unwrap();
            } else {
                env.txn_abort(&txn).unwrap();
                expected.extend(plan.payloads.iter().rev().cloned());
            }
        }
        prop_assert_eq!(undo.payloads(), expected);

        let commits = env
            .records()
            .iter()
            .filter(|r| r.rectype() == RecordType::Commit)
            .count();
        let logged_commits = plans
            .iter()
            .filter(|p| p.commit && !p.payloads.is_empty())
            .count();
        prop_assert_eq!(commits, logged_commits);
    }

    #[test]
    fn nested_plans_undo_in_reverse_chain_order(plan in nested_plan_strategy()) {
        let env = TestEnv::memory();
        let undo = Arc::new(RecordingUndo::new());
        env.set_undo_handler(Arc::clone(&undo) as Arc<dyn UndoHandler>);

        let parent = env.txn_begin(None, TxnOptions::new()).unwrap();
        for payload in &plan.before {
            env.txn_put(&parent, payload).unwrap();
        }
        let child = env.txn_begin(Some(&parent), TxnOptions::new()).unwrap();
        for payload in &plan.child {
            env.txn_put(&child, payload).unwrap();
        }
        if plan.child_commits {
            env.txn_commit(&child, None).unwrap();
        } else {
            env.txn_abort(&child).unwrap();
        }
        for payload in &plan.after {
            env.txn_put(&parent, payload).unwrap();
        }
        if plan.parent_commits {
            env.txn_commit(&parent, None).unwrap();
        } else {
            env.txn_abort(&parent).unwrap();
        }

        let mut expected: Vec<Vec<u8>> = Vec::new();
        if !plan.child_commits {
            expected.extend(plan.child.iter().rev().cloned());
        }
        if !plan.parent_commits {
            expected.extend(plan.after.iter().rev().cloned());
            if plan.child_commits {
                expected.extend(plan.child.iter().rev().cloned());
            }
            expected.extend(plan.before.iter().rev().cloned());
        }
        prop_assert_eq!(undo.payloads(), expected);
        prop_assert_eq!(env.txn_stat().active, 0);
    }
}
