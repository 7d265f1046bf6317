//! Ledger of the active account's commits that the chain has accepted but
//! not yet executed.

use crate::models::{CommitKey, CommitType};
use crate::pool::{PoolSnapshot, TokenPricing};
use bigdecimal::BigDecimal;
use ethers::types::Address;
use std::collections::BTreeMap;
use tracing::debug;

/// Descriptor for the cancel button attached to a pending commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelAction {
    pub commit: CommitKey,
    pub label: &'static str,
}

impl CancelAction {
    pub fn for_commit(commit: CommitKey, commit_type: CommitType) -> Self {
        let label = if commit_type.is_mint() {
            "Cancel Buy"
        } else {
            "Cancel Sell"
        };
        Self { commit, label }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingCommitEntry {
    pub commit_id: CommitKey,
    pub pool_address: Address,
    pub commit_type: CommitType,
    pub amount: BigDecimal,
    /// Value in quote units when the commit was observed.
    pub derived_value: BigDecimal,
    pub token_name: String,
    pub deadline_upkeep: u64,
    pub deadline_front_running_cutoff: u64,
    pub cancel_action: CancelAction,
}

impl PendingCommitEntry {
    /// Build an entry for a freshly observed commit, pricing it against `pool`.
    pub fn from_event(
        pool: &PoolSnapshot,
        id: u128,
        commit_type: CommitType,
        amount: BigDecimal,
        pricing: &dyn TokenPricing,
    ) -> Self {
        let commit_id = CommitKey {
            pool: pool.address,
            id,
        };
        let derived_value = value_of(pool, commit_type, &amount, pricing);
        Self {
            commit_id,
            pool_address: pool.address,
            commit_type,
            amount,
            derived_value,
            token_name: pool.side_token(commit_type.side()).name.clone(),
            deadline_upkeep: pool.deadline_upkeep(),
            deadline_front_running_cutoff: pool.deadline_front_running_cutoff(),
            cancel_action: CancelAction::for_commit(commit_id, commit_type),
        }
    }
}

/// What the user sees for a pending commit.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitNotification {
    pub message: String,
    pub value_at_current_price: BigDecimal,
    pub deadline_upkeep: u64,
    pub deadline_front_running_cutoff: u64,
    pub cancel_action: CancelAction,
}

/// Mints are denominated in quote tokens already; burns are priced per pool token.
fn value_of(
    pool: &PoolSnapshot,
    commit_type: CommitType,
    amount: &BigDecimal,
    pricing: &dyn TokenPricing,
) -> BigDecimal {
    if commit_type.is_mint() {
        amount.clone()
    } else {
        amount * &pricing.token_price(pool, commit_type.side())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PendingCommitLedger {
    entries: BTreeMap<CommitKey, PendingCommitEntry>,
}

impl PendingCommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if an entry with the same id was already present (it is replaced).
    pub fn record(&mut self, entry: PendingCommitEntry) -> bool {
        self.entries.insert(entry.commit_id, entry).is_none()
    }

    /// Remove and return the entry for `commit`. Unknown ids are a no-op.
    pub fn resolve(&mut self, commit: &CommitKey) -> Option<PendingCommitEntry> {
        let removed = self.entries.remove(commit);
        if removed.is_none() {
            debug!(%commit, "[LEDGER] resolve for unknown commit ignored");
        }
        removed
    }

    pub fn get(&self, commit: &CommitKey) -> Option<&PendingCommitEntry> {
        self.entries.get(commit)
    }

    pub fn list_for(&self, pool: &Address) -> Vec<&PendingCommitEntry> {
        self.entries
            .values()
            .filter(|e| &e.pool_address == pool)
            .collect()
    }

    /// Drop entries whose upkeep deadline is earlier than `before`.
    pub fn expire(&mut self, before: u64) -> Vec<PendingCommitEntry> {
        let stale: Vec<CommitKey> = self
            .entries
            .values()
            .filter(|e| e.deadline_upkeep < before)
            .map(|e| e.commit_id)
            .collect();
        stale
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingCommitEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notification_for(
        &self,
        entry: &PendingCommitEntry,
        pool: &PoolSnapshot,
        pricing: &dyn TokenPricing,
    ) -> CommitNotification {
        let message = if entry.commit_type.is_mint() {
            format!("Pending buy of {} for {}", entry.token_name, entry.amount)
        } else {
            format!("Pending sale of {} {}", entry.amount, entry.token_name)
        };
        CommitNotification {
            message,
            value_at_current_price: value_of(pool, entry.commit_type, &entry.amount, pricing),
            deadline_upkeep: entry.deadline_upkeep,
            deadline_front_running_cutoff: entry.deadline_front_running_cutoff,
            cancel_action: entry.cancel_action.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BalanceOverSupply;
    use crate::pool::state::fixtures::{addr, btc_pool};

    fn entry(pool: &PoolSnapshot, id: u128, ty: CommitType, amount: i64) -> PendingCommitEntry {
        PendingCommitEntry::from_event(pool, id, ty, BigDecimal::from(amount), &BalanceOverSupply)
    }

    #[test]
    fn resolving_unknown_id_leaves_ledger_unchanged() {
        let pool = btc_pool(addr(0xaa));
        let mut ledger = PendingCommitLedger::new();
        ledger.record(entry(&pool, 1, CommitType::LongMint, 10));

        let missing = CommitKey {
            pool: pool.address,
            id: 99,
        };
        assert!(ledger.resolve(&missing).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn resolve_is_idempotent() {
        let pool = btc_pool(addr(0xaa));
        let mut ledger = PendingCommitLedger::new();
        let e = entry(&pool, 7, CommitType::ShortBurn, 4);
        let key = e.commit_id;
        assert!(ledger.record(e));

        assert!(ledger.resolve(&key).is_some());
        assert!(ledger.resolve(&key).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn entries_carry_deadlines_and_cancel_label() {
        let pool = btc_pool(addr(0xaa));
        let mint = entry(&pool, 1, CommitType::LongMint, 10);
        let burn = entry(&pool, 2, CommitType::LongBurn, 10);

        assert_eq!(mint.deadline_upkeep, 1_700_003_600);
        assert_eq!(mint.deadline_front_running_cutoff, 1_700_003_300);
        assert_eq!(mint.cancel_action.label, "Cancel Buy");
        assert_eq!(burn.cancel_action.label, "Cancel Sell");
        assert_eq!(burn.token_name, "3L-BTC/USD");
    }

    #[test]
    fn notification_uses_current_price() {
        let mut pool = btc_pool(addr(0xaa));
        let mut ledger = PendingCommitLedger::new();
        let burn = entry(&pool, 3, CommitType::LongBurn, 10);
        assert_eq!(burn.derived_value, BigDecimal::from(20));
        ledger.record(burn.clone());

        pool.long_balance = BigDecimal::from(1500);
        let note = ledger.notification_for(&burn, &pool, &BalanceOverSupply);
        assert_eq!(note.value_at_current_price, BigDecimal::from(30));
        assert_eq!(note.cancel_action, burn.cancel_action);
        assert!(note.message.contains("3L-BTC/USD"));
    }

    #[test]
    fn expire_and_list_by_pool() {
        let a = btc_pool(addr(0xaa));
        let mut b = btc_pool(addr(0xbb));
        b.last_update_timestamp = 1_800_000_000;

        let mut ledger = PendingCommitLedger::new();
        ledger.record(entry(&a, 1, CommitType::LongMint, 1));
        ledger.record(entry(&b, 1, CommitType::ShortMint, 1));

        assert_eq!(ledger.list_for(&a.address).len(), 1);
        let expired = ledger.expire(1_750_000_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].pool_address, a.address);
        assert_eq!(ledger.list_for(&b.address).len(), 1);
    }
}
