//! Transaction detail slots and the id space.

use crate::error::{CoreError, CoreResult};
use crate::txn::{GlobalXid, TxnStatus};
use crate::types::{Lsn, SyncPolicy, TxnId, TXN_MINIMUM};
use std::time::Duration;

/// Per-transaction state held in the transaction region.
#[derive(Debug, Clone)]
pub(crate) struct TransactionDetail {
    pub txnid: TxnId,
    /// Slot of the parent, for nested transactions.
    pub parent: Option<usize>,
    /// Slots of unresolved children, in begin order.
    pub kids: Vec<usize>,
    pub status: TxnStatus,
    /// Most recent record of this transaction's chain, ZERO if none.
    pub last_lsn: Lsn,
    /// End of the log when the transaction began.
    pub begin_lsn: Lsn,
    pub xid: Option<GlobalXid>,
    pub name: Option<String>,
    pub lock_timeout: Option<Duration>,
    pub txn_timeout: Option<Duration>,
    pub sync: Option<SyncPolicy>,
    pub compensating: bool,
}

/// Slot arena plus id allocation state. Guarded by the transaction
/// manager's region lock.
#[derive(Debug)]
pub(crate) struct TxnRegion {
    slots: Vec<Option<TransactionDetail>>,
    generations: Vec<u64>,
    free: Vec<usize>,
    active: usize,
    max_txns: usize,
    /// Last id handed out.
    last_txnid: u32,
    /// Highest id usable before the next recycle.
    cur_max: u32,
    window: u32,
    pub recovering: bool,
}

impl TxnRegion {
    pub fn new(window: u32, max_txns: usize) -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            active: 0,
            max_txns,
            last_txnid: TXN_MINIMUM - 1,
            cur_max: window_max(window),
            window,
            recovering: false,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn capacity(&self) -> usize {
        self.max_txns
    }

    pub fn last_txnid(&self) -> u32 {
        self.last_txnid
    }

    pub fn cur_max(&self) -> u32 {
        self.cur_max
    }

    /// Places `detail` in a free slot, returning the slot and its
    /// generation.
    pub fn alloc(&mut self, detail: TransactionDetail) -> CoreResult<(usize, u64)> {
        if self.active >= self.max_txns {
            return Err(CoreError::TooManyTransactions { max: self.max_txns });
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(detail);
                slot
            }
            None => {
                self.slots.push(Some(detail));
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        self.active += 1;
        Ok((slot, self.generations[slot]))
    }

    /// The detail in `slot` if `generation` is still current.
    pub fn get(&self, slot: usize, generation: u64) -> CoreResult<&TransactionDetail> {
        match (self.slots.get(slot), self.generations.get(slot)) {
            (Some(Some(detail)), Some(&current)) if current == generation => Ok(detail),
            _ => Err(stale()),
        }
    }

    pub fn get_mut(&mut self, slot: usize, generation: u64) -> CoreResult<&mut TransactionDetail> {
        match (self.slots.get_mut(slot), self.generations.get(slot)) {
            (Some(Some(detail)), Some(&current)) if current == generation => Ok(detail),
            _ => Err(stale()),
        }
    }

    /// Current generation of an occupied slot.
    pub fn generation(&self, slot: usize) -> Option<u64> {
        match self.slots.get(slot) {
            Some(Some(_)) => self.generations.get(slot).copied(),
            _ => None,
        }
    }

    /// Frees `slot`, unlinking it from its parent.
    pub fn release(&mut self, slot: usize, generation: u64) -> CoreResult<TransactionDetail> {
        self.get(slot, generation)?;
        let detail = self.slots[slot].take().ok_or_else(stale)?;
        if let Some(parent) = detail.parent {
            if let Some(Some(parent)) = self.slots.get_mut(parent) {
                parent.kids.retain(|&kid| kid != slot);
            }
        }
        self.generations[slot] += 1;
        self.free.push(slot);
        self.active -= 1;
        Ok(detail)
    }

    /// Occupied slots with their generations.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64, &TransactionDetail)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, detail)| detail.as_ref().map(|d| (slot, self.generations[slot], d)))
    }

    /// Oldest begin LSN among active transactions.
    pub fn oldest_begin_lsn(&self) -> Option<Lsn> {
        self.iter()
            .filter(|(_, _, d)| !d.status.is_resolved())
            .map(|(_, _, d)| d.begin_lsn)
            .filter(|lsn| !lsn.is_zero())
            .min()
    }

    /// Hands out the next id of the current range, if any is left.
    pub fn next_id(&mut self) -> Option<TxnId> {
        if self.last_txnid >= self.cur_max {
            return None;
        }
        self.last_txnid += 1;
        Some(TxnId::new(self.last_txnid))
    }

    /// Picks the largest run of ids not used by an active transaction as
    /// the new range.
    pub fn recycle(&mut self) -> CoreResult<(u32, u32)> {
        let mut active: Vec<u32> = self.iter().map(|(_, _, d)| d.txnid.as_u32()).collect();
        active.sort_unstable();
        active.dedup();
        let (min, max) = largest_gap(&active, TXN_MINIMUM, window_max(self.window))
            .ok_or(CoreError::TxnIdSpaceExhausted)?;
        self.last_txnid = min - 1;
        self.cur_max = max;
        Ok((min, max))
    }
}

fn window_max(window: u32) -> u32 {
    TXN_MINIMUM.saturating_add(window.saturating_sub(1))
}

fn stale() -> CoreError {
    CoreError::invalid_state("transaction handle has already been resolved")
}

/// Largest run of values in `[min, max]` not present in `active` (sorted,
/// deduplicated), or `None` if every value is taken.
pub fn largest_gap(active: &[u32], min: u32, max: u32) -> Option<(u32, u32)> {
    let mut best: Option<(u64, u64)> = None;
    let mut consider = |lo: u64, hi: u64| {
        if lo <= hi && best.map_or(true, |(blo, bhi)| hi - lo > bhi - blo) {
            best = Some((lo, hi));
        }
    };
    let mut lo = u64::from(min);
    for &id in active.iter().filter(|&&id| id >= min && id <= max) {
        let id = u64::from(id);
        if id > lo {
            consider(lo, id - 1);
        }
        lo = id + 1;
    }
    consider(lo, u64::from(max));
    best.map(|(lo, hi)| (lo as u32, hi as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detail(id: u32) -> TransactionDetail {
        TransactionDetail {
            txnid: TxnId::new(id),
            parent: None,
            kids: Vec::new(),
            status: TxnStatus::Running,
            last_lsn: Lsn::ZERO,
            begin_lsn: Lsn::new(1, 48),
            xid: None,
            name: None,
            lock_timeout: None,
            txn_timeout: None,
            sync: None,
            compensating: false,
        }
    }

    #[test]
    fn gaps() {
        assert_eq!(largest_gap(&[], 10, 20), Some((10, 20)));
        assert_eq!(largest_gap(&[10, 11, 15], 10, 20), Some((16, 20)));
        assert_eq!(largest_gap(&[12, 19], 10, 20), Some((13, 18)));
        assert_eq!(largest_gap(&[10, 11, 12], 10, 12), None);
        assert_eq!(largest_gap(&[u32::MAX], u32::MAX - 3, u32::MAX), Some((u32::MAX - 3, u32::MAX - 1)));
    }

    #[test]
    fn slots_are_reused_with_new_generations() {
        let mut region = TxnRegion::new(16, 2);
        let (a, gen_a) = region.alloc(detail(1)).unwrap();
        let (_b, _) = region.alloc(detail(2)).unwrap();
        assert!(matches!(
            region.alloc(detail(3)),
            Err(CoreError::TooManyTransactions { max: 2 })
        ));

        region.release(a, gen_a).unwrap();
        assert!(region.get(a, gen_a).is_err());
        let (c, gen_c) = region.alloc(detail(3)).unwrap();
        assert_eq!(c, a);
        assert_ne!(gen_c, gen_a);
        assert_eq!(region.active(), 2);
    }

    #[test]
    fn ids_recycle_into_largest_free_range() {
        let mut region = TxnRegion::new(4, 16);
        let ids: Vec<TxnId> = std::iter::from_fn(|| region.next_id()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], TxnId::new(TXN_MINIMUM));

        let _ = region.alloc(detail(TXN_MINIMUM)).unwrap();
        let _ = region.alloc(detail(TXN_MINIMUM + 3)).unwrap();
        assert_eq!(region.recycle().unwrap(), (TXN_MINIMUM + 1, TXN_MINIMUM + 2));
        assert_eq!(region.next_id(), Some(TxnId::new(TXN_MINIMUM + 1)));
        assert_eq!(region.next_id(), Some(TxnId::new(TXN_MINIMUM + 2)));
        assert_eq!(region.next_id(), None);
    }

    #[test]
    fn resolved_transactions_leave_the_horizon() {
        let mut region = TxnRegion::new(16, 4);
        let (old, gen_old) = region.alloc(detail(1)).unwrap();
        let mut young = detail(2);
        young.begin_lsn = Lsn::new(3, 100);
        region.alloc(young).unwrap();
        assert_eq!(region.oldest_begin_lsn(), Some(Lsn::new(1, 48)));

        region.get_mut(old, gen_old).unwrap().status = TxnStatus::Aborted;
        assert_eq!(region.oldest_begin_lsn(), Some(Lsn::new(3, 100)));
    }

    #[test]
    fn full_id_space_is_exhausted() {
        let mut region = TxnRegion::new(2, 16);
        for id in [TXN_MINIMUM, TXN_MINIMUM + 1] {
            region.alloc(detail(id)).unwrap();
        }
        assert!(matches!(region.recycle(), Err(CoreError::TxnIdSpaceExhausted)));
    }

    proptest! {
        #[test]
        fn gap_is_free_and_maximal(mut active in prop::collection::vec(0u32..64, 0..40)) {
            active.sort_unstable();
            active.dedup();
            match largest_gap(&active, 0, 63) {
                Some((lo, hi)) => {
                    prop_assert!(lo <= hi);
                    prop_assert!(active.iter().all(|&id| id < lo || id > hi));
                    let mut run = 0u32;
                    let mut longest = 0u32;
                    for id in 0..64u32 {
                        if active.binary_search(&id).is_ok() { run = 0 } else { run += 1; longest = longest.max(run) }
                    }
                    prop_assert_eq!(hi - lo + 1, longest);
                }
                None => prop_assert_eq!(active.len(), 64),
            }
        }
    }
}
