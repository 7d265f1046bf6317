//! Committer events and their reconciliation into pool and ledger state.

use crate::commits::ledger::{PendingCommitEntry, PendingCommitLedger};
use crate::models::{BalanceKind, CommitKey, CommitType, LogKey};
use crate::notices::Notice;
use crate::pool::{PoolStateStore, TokenPricing};
use crate::utils::to_decimal;
use bigdecimal::BigDecimal;
use ethers::types::{Address, U256};
use num_traits::Zero;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// The four events a committer emits.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitEventKind {
    Created {
        id: u128,
        amount: U256,
        commit_type: CommitType,
        /// Sender of the originating transaction, once resolved.
        sender: Option<Address>,
    },
    Executed {
        id: u128,
        amount: U256,
        commit_type: CommitType,
    },
    Removed {
        id: u128,
        amount: U256,
        commit_type: CommitType,
    },
    Failed,
}

/// A decoded committer log, as delivered by the chain source.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitLog {
    pub log: LogKey,
    pub kind: CommitEventKind,
}

/// A committer event attributed to a pool, ready for the engine queue.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitEvent {
    pub pool: Address,
    pub log: LogKey,
    pub kind: CommitEventKind,
}

/// Fields of a creation event after decoding.
struct Creation {
    log: LogKey,
    id: u128,
    commit_type: CommitType,
    amount: BigDecimal,
    sender: Option<Address>,
}

/// Commit seen on chain and not yet executed or removed, from any account.
#[derive(Clone, Debug)]
struct OpenCommit {
    commit_type: CommitType,
    amount: BigDecimal,
    created: LogKey,
}

/// Translates committer events into store deltas and ledger changes.
///
/// Creation events are applied once per log position; the position is
/// forgotten when the commit closes. Execution and removal only act on ids
/// this reconciler saw being created. Quantities only move for events newer
/// than the block the pool snapshot was read at, since older ones are already
/// part of it.
#[derive(Default)]
pub struct CommitReconciler {
    applied: HashSet<LogKey>,
    open: HashMap<CommitKey, OpenCommit>,
    /// Highest block of any event seen per pool.
    last_block: HashMap<Address, u64>,
    /// Highest block of an execution or removal per pool.
    closed_through: HashMap<Address, u64>,
}

/// Collaborators the reconciler mutates or reads while applying an event.
pub struct ReconcileContext<'a> {
    pub store: &'a mut PoolStateStore,
    pub ledger: &'a mut PendingCommitLedger,
    pub account: Option<Address>,
    pub pricing: &'a dyn TokenPricing,
}

impl CommitReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits currently counted in pending aggregates.
    pub fn open_commits(&self) -> usize {
        self.open.len()
    }

    /// Number of creation log positions held for deduplication.
    pub fn tracked_logs(&self) -> usize {
        self.applied.len()
    }

    /// Highest block of any event applied for `pool`.
    pub fn last_block(&self, pool: &Address) -> Option<u64> {
        self.last_block.get(pool).copied()
    }

    pub fn apply(&mut self, event: CommitEvent, ctx: &mut ReconcileContext<'_>) -> Vec<Notice> {
        let Some(snapshot) = ctx.store.get_snapshot(&event.pool) else {
            debug!(pool = ?event.pool, "[EVENTS] event for unknown pool ignored");
            return Vec::new();
        };
        // mints are quote tokens, burns are the side's pool tokens
        let (quote, long, short) = (
            snapshot.quote_token.decimals,
            snapshot.long_token.decimals,
            snapshot.short_token.decimals,
        );
        let decimals = move |ty: CommitType| match ty {
            CommitType::LongBurn => long,
            CommitType::ShortBurn => short,
            CommitType::LongMint | CommitType::ShortMint => quote,
        };
        let block = event.log.block_number;
        let moves_quantities = block > snapshot.synced_block;

        let seen = self.last_block.entry(event.pool).or_default();
        *seen = (*seen).max(block);

        match event.kind {
            CommitEventKind::Created {
                id,
                amount,
                commit_type,
                sender,
            } => {
                if self.applied.contains(&event.log) {
                    debug!(pool = ?event.pool, log = ?event.log, "[EVENTS] duplicate log ignored");
                    return Vec::new();
                }
                if self
                    .closed_through
                    .get(&event.pool)
                    .is_some_and(|closed| block < *closed)
                {
                    debug!(pool = ?event.pool, id, block, "[EVENTS] replayed creation ignored");
                    return Vec::new();
                }
                let amount = to_decimal(amount, decimals(commit_type));
                let created = Creation {
                    log: event.log,
                    id,
                    commit_type,
                    amount,
                    sender,
                };
                self.on_created(event.pool, created, moves_quantities, ctx)
            }
            CommitEventKind::Executed {
                id,
                amount,
                commit_type,
            } => {
                let amount = to_decimal(amount, decimals(commit_type));
                self.on_executed(event.pool, id, commit_type, amount, block, moves_quantities, ctx)
            }
            CommitEventKind::Removed { id, .. } => {
                self.on_removed(event.pool, id, block, moves_quantities, ctx)
            }
            CommitEventKind::Failed => {
                warn!(pool = ?event.pool, "[EVENTS] committer reported a failed execution");
                vec![Notice::CommitMayHaveFailed { pool: event.pool }]
            }
        }
    }

    fn on_created(
        &mut self,
        pool: Address,
        created: Creation,
        moves_quantities: bool,
        ctx: &mut ReconcileContext<'_>,
    ) -> Vec<Notice> {
        let Creation {
            log,
            id,
            commit_type,
            amount,
            sender,
        } = created;
        let key = CommitKey { pool, id };
        if self.open.contains_key(&key) {
            debug!(%key, "[EVENTS] commit already open");
            return Vec::new();
        }
        debug!(%key, ?commit_type, %amount, "[EVENTS] commit created");

        if moves_quantities {
            ctx.store.apply_balance_delta(
                &pool,
                commit_type.side(),
                BalanceKind::Pending,
                &commit_type.signed(&amount),
            );
        }
        self.applied.insert(log);
        self.open.insert(
            key,
            OpenCommit {
                commit_type,
                amount: amount.clone(),
                created: log,
            },
        );

        let is_ours = matches!((sender, ctx.account), (Some(s), Some(a)) if s == a);
        if !is_ours {
            return Vec::new();
        }
        let Some(snapshot) = ctx.store.get_snapshot(&pool) else {
            return Vec::new();
        };
        let entry = PendingCommitEntry::from_event(snapshot, id, commit_type, amount, ctx.pricing);
        let notice = ctx.ledger.notification_for(&entry, snapshot, ctx.pricing);
        ctx.ledger.record(entry);
        info!(%key, message = %notice.message, "[LEDGER] pending commit recorded");
        vec![Notice::CommitPending(notice)]
    }

    #[allow(clippy::too_many_arguments)]
    fn on_executed(
        &mut self,
        pool: Address,
        id: u128,
        commit_type: CommitType,
        amount: BigDecimal,
        block: u64,
        moves_quantities: bool,
        ctx: &mut ReconcileContext<'_>,
    ) -> Vec<Notice> {
        let key = CommitKey { pool, id };
        let Some(open) = self.close(key, block) else {
            debug!(%key, "[EVENTS] execution for unseen commit ignored");
            return Vec::new();
        };
        debug!(%key, ?commit_type, %amount, "[EVENTS] commit executed");

        if moves_quantities {
            ctx.store.apply_balance_delta(
                &pool,
                open.commit_type.side(),
                BalanceKind::Pending,
                &-open.commit_type.signed(&open.amount),
            );
            self.settle(pool, commit_type, &amount, ctx);
        }

        let mut notices = Vec::new();
        if ctx.ledger.resolve(&key).is_some() {
            notices.push(Notice::CommitExecuted(key));
        }
        notices
    }

    fn on_removed(
        &mut self,
        pool: Address,
        id: u128,
        block: u64,
        moves_quantities: bool,
        ctx: &mut ReconcileContext<'_>,
    ) -> Vec<Notice> {
        let key = CommitKey { pool, id };
        let Some(open) = self.close(key, block) else {
            debug!(%key, "[EVENTS] removal for unseen commit ignored");
            return Vec::new();
        };
        debug!(%key, "[EVENTS] commit removed");

        if moves_quantities {
            ctx.store.apply_balance_delta(
                &pool,
                open.commit_type.side(),
                BalanceKind::Pending,
                &-open.commit_type.signed(&open.amount),
            );
        }

        let mut notices = Vec::new();
        if ctx.ledger.resolve(&key).is_some() {
            notices.push(Notice::CommitCancelled(key));
        }
        notices
    }

    /// Forget an open commit and its creation log.
    fn close(&mut self, key: CommitKey, block: u64) -> Option<OpenCommit> {
        let open = self.open.remove(&key)?;
        self.applied.remove(&open.created);
        let closed = self.closed_through.entry(key.pool).or_default();
        *closed = (*closed).max(block);
        Some(open)
    }

    /// Move an executed commit into the side's collateral and supply.
    ///
    /// Mint amounts are quote tokens; burn amounts are pool tokens redeemed at the
    /// current token price.
    fn settle(
        &self,
        pool: Address,
        commit_type: CommitType,
        amount: &BigDecimal,
        ctx: &mut ReconcileContext<'_>,
    ) {
        let side = commit_type.side();
        let Some(snapshot) = ctx.store.get_snapshot(&pool) else {
            return;
        };
        let price = ctx.pricing.token_price(snapshot, side);

        let (collateral, supply) = if commit_type.is_mint() {
            let minted = if price.is_zero() {
                amount.clone()
            } else {
                amount / &price
            };
            (amount.clone(), minted)
        } else {
            (-(amount * &price), -amount.clone())
        };
        ctx.store
            .apply_balance_delta(&pool, side, BalanceKind::Settlement, &collateral);
        ctx.store
            .apply_balance_delta(&pool, side, BalanceKind::Supply, &supply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BalanceOverSupply;
    use crate::pool::state::fixtures::{addr, btc_pool};
    use ethers::types::H256;

    const ACCOUNT: u8 = 0xee;

    struct Harness {
        store: PoolStateStore,
        ledger: PendingCommitLedger,
        reconciler: CommitReconciler,
        next_log: u64,
    }

    impl Harness {
        fn new() -> Self {
            let mut store = PoolStateStore::new();
            store.upsert_pool(btc_pool(addr(0xaa)));
            Self {
                store,
                ledger: PendingCommitLedger::new(),
                reconciler: CommitReconciler::new(),
                next_log: 0,
            }
        }

        fn log(&mut self) -> LogKey {
            self.next_log += 1;
            LogKey {
                block_number: self.next_log,
                tx_hash: H256::from_low_u64_be(self.next_log),
                log_index: 0,
            }
        }

        fn send_at(&mut self, log: LogKey, kind: CommitEventKind) -> Vec<Notice> {
            let event = CommitEvent {
                pool: addr(0xaa),
                log,
                kind,
            };
            let mut ctx = ReconcileContext {
                store: &mut self.store,
                ledger: &mut self.ledger,
                account: Some(addr(ACCOUNT)),
                pricing: &BalanceOverSupply,
            };
            self.reconciler.apply(event, &mut ctx)
        }

        fn send(&mut self, kind: CommitEventKind) -> Vec<Notice> {
            let log = self.log();
            self.send_at(log, kind)
        }

        fn pool(&self) -> crate::pool::PoolSnapshot {
            self.store.get_snapshot(&addr(0xaa)).unwrap().clone()
        }
    }

    fn created(id: u128, amount: u64, ty: CommitType, sender: u8) -> CommitEventKind {
        CommitEventKind::Created {
            id,
            amount: U256::from(amount) * U256::exp10(6),
            commit_type: ty,
            sender: Some(addr(sender)),
        }
    }

    fn executed(id: u128, amount: u64, ty: CommitType) -> CommitEventKind {
        CommitEventKind::Executed {
            id,
            amount: U256::from(amount) * U256::exp10(6),
            commit_type: ty,
        }
    }

    fn removed(id: u128, amount: u64, ty: CommitType) -> CommitEventKind {
        CommitEventKind::Removed {
            id,
            amount: U256::from(amount) * U256::exp10(6),
            commit_type: ty,
        }
    }

    #[test]
    fn own_commit_is_recorded_then_executed() {
        let mut h = Harness::new();
        let key = CommitKey {
            pool: addr(0xaa),
            id: 7,
        };

        let notices = h.send(created(7, 100, CommitType::LongMint, ACCOUNT));
        assert!(matches!(notices.as_slice(), [Notice::CommitPending(_)]));
        assert!(h.ledger.get(&key).is_some());
        assert_eq!(h.pool().pending_long, BigDecimal::from(100));

        let notices = h.send(executed(7, 100, CommitType::LongMint));
        assert_eq!(notices, vec![Notice::CommitExecuted(key)]);
        assert!(h.ledger.get(&key).is_none());

        let pool = h.pool();
        assert_eq!(pool.long_balance, BigDecimal::from(1100));
        assert_eq!(pool.long_token.supply, BigDecimal::from(550));
        assert_eq!(pool.pending_long, BigDecimal::zero());
    }

    #[test]
    fn other_accounts_only_move_the_aggregate() {
        let mut h = Harness::new();
        let notices = h.send(created(1, 40, CommitType::ShortMint, 0x11));
        assert!(notices.is_empty());
        assert!(h.ledger.is_empty());
        assert_eq!(h.pool().pending_short, BigDecimal::from(40));
    }

    #[test]
    fn duplicate_log_is_applied_once() {
        let mut h = Harness::new();
        let log = h.log();
        h.send_at(log, created(1, 40, CommitType::LongBurn, 0x11));
        h.send_at(log, created(1, 40, CommitType::LongBurn, 0x11));
        assert_eq!(h.pool().pending_long, BigDecimal::from(-40));
    }

    #[test]
    fn removal_keeps_settled_balances() {
        let mut h = Harness::new();
        let key = CommitKey {
            pool: addr(0xaa),
            id: 3,
        };
        h.send(created(3, 25, CommitType::ShortBurn, ACCOUNT));
        let notices = h.send(removed(3, 25, CommitType::ShortBurn));

        assert_eq!(notices, vec![Notice::CommitCancelled(key)]);
        let pool = h.pool();
        assert_eq!(pool.short_balance, BigDecimal::from(1000));
        assert_eq!(pool.pending_short, BigDecimal::zero());
    }

    #[test]
    fn burn_execution_redeems_at_token_price() {
        let mut h = Harness::new();
        h.send(created(4, 100, CommitType::LongBurn, 0x11));
        h.send(executed(4, 100, CommitType::LongBurn));

        let pool = h.pool();
        // price 2: 100 tokens redeem 200 quote
        assert_eq!(pool.long_balance, BigDecimal::from(800));
        assert_eq!(pool.long_token.supply, BigDecimal::from(400));
        assert_eq!(pool.pending_long, BigDecimal::zero());
    }

    #[test]
    fn unseen_ids_are_ignored() {
        let mut h = Harness::new();
        assert!(h.send(executed(42, 10, CommitType::LongMint)).is_empty());
        assert!(h.send(removed(43, 10, CommitType::LongMint)).is_empty());
        let pool = h.pool();
        assert_eq!(pool.long_balance, BigDecimal::from(1000));
        assert_eq!(pool.pending_long, BigDecimal::zero());
    }

    #[test]
    fn aggregate_equals_sum_of_unmatched_creations() {
        let mut h = Harness::new();
        h.send(created(1, 10, CommitType::LongMint, 0x11));
        h.send(created(2, 20, CommitType::LongMint, ACCOUNT));
        h.send(created(3, 5, CommitType::LongBurn, 0x12));
        h.send(created(4, 7, CommitType::ShortMint, 0x11));
        h.send(executed(1, 10, CommitType::LongMint));
        h.send(removed(4, 7, CommitType::ShortMint));
        // second delivery of an execution under a new log must not double count
        h.send(executed(1, 10, CommitType::LongMint));

        let pool = h.pool();
        assert_eq!(pool.pending_long, BigDecimal::from(20 - 5));
        assert_eq!(pool.pending_short, BigDecimal::zero());
        assert_eq!(h.reconciler.open_commits(), 2);
    }

    #[test]
    fn failure_event_broadcasts_generic_notice() {
        let mut h = Harness::new();
        h.send(created(1, 10, CommitType::LongMint, ACCOUNT));
        let notices = h.send(CommitEventKind::Failed);
        assert_eq!(notices, vec![Notice::CommitMayHaveFailed { pool: addr(0xaa) }]);
        assert_eq!(h.ledger.len(), 1);
    }

    #[test]
    fn closed_commits_release_their_creation_logs() {
        let mut h = Harness::new();
        for id in 0..50 {
            h.send(created(id, 10, CommitType::LongMint, 0x11));
            if id % 2 == 0 {
                h.send(executed(id, 10, CommitType::LongMint));
            } else {
                h.send(removed(id, 10, CommitType::LongMint));
            }
        }
        assert_eq!(h.reconciler.open_commits(), 0);
        assert_eq!(h.reconciler.tracked_logs(), 0);
        assert_eq!(h.pool().pending_long, BigDecimal::zero());
        assert_eq!(h.reconciler.last_block(&addr(0xaa)), Some(100));
    }

    #[test]
    fn creation_redelivered_after_execution_is_ignored() {
        let mut h = Harness::new();
        let log = h.log();
        h.send_at(log, created(1, 30, CommitType::ShortMint, 0x11));
        h.send(executed(1, 30, CommitType::ShortMint));
        assert_eq!(h.reconciler.tracked_logs(), 0);

        h.send_at(log, created(1, 30, CommitType::ShortMint, 0x11));
        assert_eq!(h.pool().pending_short, BigDecimal::zero());
        assert_eq!(h.reconciler.open_commits(), 0);
    }

    #[test]
    fn events_already_in_the_snapshot_leave_quantities_alone() {
        let mut h = Harness::new();
        h.send(created(1, 100, CommitType::LongMint, ACCOUNT));

        // refetch at block 5 already reflects the execution
        let mut fetched = btc_pool(addr(0xaa));
        fetched.synced_block = 5;
        fetched.long_balance = BigDecimal::from(1100);
        fetched.long_token.supply = BigDecimal::from(550);
        h.store.upsert_pool(fetched);

        let log = LogKey {
            block_number: 4,
            tx_hash: H256::repeat_byte(0x44),
            log_index: 0,
        };
        let notices = h.send_at(log, executed(1, 100, CommitType::LongMint));

        assert_eq!(
            notices,
            vec![Notice::CommitExecuted(CommitKey {
                pool: addr(0xaa),
                id: 1
            })]
        );
        let pool = h.pool();
        assert_eq!(pool.long_balance, BigDecimal::from(1100));
        assert_eq!(pool.long_token.supply, BigDecimal::from(550));
        assert_eq!(pool.pending_long, BigDecimal::zero());
        assert_eq!(h.reconciler.open_commits(), 0);
    }

    #[test]
    fn events_for_unknown_pools_are_dropped() {
        let mut h = Harness::new();
        let log = h.log();
        let mut ctx = ReconcileContext {
            store: &mut h.store,
            ledger: &mut h.ledger,
            account: Some(addr(ACCOUNT)),
            pricing: &BalanceOverSupply,
        };
        let event = CommitEvent {
            pool: addr(0x55),
            log,
            kind: created(1, 10, CommitType::LongMint, ACCOUNT),
        };
        assert!(h.reconciler.apply(event, &mut ctx).is_empty());
        assert!(h.ledger.is_empty());
        assert!(h.store.get_snapshot(&addr(0x55)).is_none());
    }
}
