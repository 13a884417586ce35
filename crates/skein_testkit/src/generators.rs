//! Property-based test generators using proptest.
//!
//! Provides strategies for record payloads and small transaction plans.

use proptest::prelude::*;
use skein_core::{PutFlags, SyncPolicy};

/// Strategy for a single record payload.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for payloads that may exceed a small log buffer.
pub fn large_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..8192)
}

/// Strategy for a batch of payloads.
pub fn payloads_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(payload_strategy(), 1..max.max(2))
}

/// Strategy for put flags.
pub fn put_flags_strategy() -> impl Strategy<Value = PutFlags> {
    prop_oneof![
        6 => Just(PutFlags::NONE),
        2 => Just(PutFlags::FLUSH),
        1 => Just(PutFlags::SYNC),
    ]
}

/// Strategy for commit durability.
pub fn sync_policy_strategy() -> impl Strategy<Value = SyncPolicy> {
    prop_oneof![
        Just(SyncPolicy::Sync),
        Just(SyncPolicy::WriteNoSync),
        Just(SyncPolicy::NoSync),
    ]
}

/// A top-level transaction to run.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Records logged, in order.
    pub payloads: Vec<Vec<u8>>,
    /// Commit if true, abort otherwise.
    pub commit: bool,
}

/// Strategy for a top-level transaction plan.
pub fn txn_plan_strategy() -> impl Strategy<Value = TxnPlan> {
    (prop::collection::vec(payload_strategy(), 0..8), any::<bool>())
        .prop_map(|(payloads, commit)| TxnPlan { payloads, commit })
}

/// A parent with one child, each resolved independently.
#[derive(Debug, Clone)]
pub struct NestedPlan {
    /// Parent records logged before the child begins.
    pub before: Vec<Vec<u8>>,
    /// Child records.
    pub child: Vec<Vec<u8>>,
    /// Commit the child if true, abort it otherwise.
    pub child_commits: bool,
    /// Parent records logged after the child resolves.
    pub after: Vec<Vec<u8>>,
    /// Commit the parent if true, abort it otherwise.
    pub parent_commits: bool,
}

/// Strategy for a nested transaction plan with short, distinct-looking
/// payloads.
pub fn nested_plan_strategy() -> impl Strategy<Value = NestedPlan> {
    let records = || prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 0..4);
    (records(), records(), any::<bool>(), records(), any::<bool>()).prop_map(
        |(before, child, child_commits, after, parent_commits)| NestedPlan {
            before,
            child,
            child_commits,
            after,
            parent_commits,
        },
    )
}
