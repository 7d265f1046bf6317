//! Authoritative pool map.
//!
//! The store has a single owner (the engine). Every mutation replaces the
//! affected pool record and publishes the whole map through a `watch`
//! channel, so readers only ever see complete records.

use crate::models::{BalanceKind, Side, TokenKind};
use crate::pool::state::{PoolSnapshot, TokenBalance};
use crate::utils::non_negative;
use bigdecimal::BigDecimal;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Published view of every known pool.
#[derive(Clone, Debug, Default)]
pub struct PoolsState {
    pub pools: HashMap<Address, PoolSnapshot>,
    /// Set once the initial pool fetch has produced at least one pool.
    pub initialised: bool,
}

pub type PoolMap = Arc<PoolsState>;

/// Mutations accepted by the store.
#[derive(Clone, Debug)]
pub enum PoolUpdate {
    Upsert(PoolSnapshot),
    BalanceDelta {
        pool: Address,
        side: Side,
        kind: BalanceKind,
        delta: BigDecimal,
    },
    SetSubscribed {
        pool: Address,
        value: bool,
    },
    SetTokenBalances {
        pool: Address,
        balances: Vec<TokenBalance>,
    },
    SetTokenApproved {
        pool: Address,
        token: TokenKind,
        value: bool,
    },
    SetInitialised(bool),
}

pub struct PoolStateStore {
    state: PoolMap,
    tx: watch::Sender<PoolMap>,
}

impl Default for PoolStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStateStore {
    pub fn new() -> Self {
        let state: PoolMap = Arc::new(PoolsState::default());
        let (tx, _rx) = watch::channel(state.clone());
        Self { state, tx }
    }

    /// Receiver that always holds the latest published map.
    pub fn subscribe(&self) -> watch::Receiver<PoolMap> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PoolMap {
        self.state.clone()
    }

    pub fn get_snapshot(&self, pool: &Address) -> Option<&PoolSnapshot> {
        self.state.pools.get(pool)
    }

    pub fn apply(&mut self, update: PoolUpdate) -> bool {
        match update {
            PoolUpdate::Upsert(snapshot) => {
                self.upsert_pool(snapshot);
                true
            }
            PoolUpdate::BalanceDelta {
                pool,
                side,
                kind,
                delta,
            } => self.apply_balance_delta(&pool, side, kind, &delta),
            PoolUpdate::SetSubscribed { pool, value } => self.set_subscribed(&pool, value),
            PoolUpdate::SetTokenBalances { pool, balances } => {
                self.set_token_balances(&pool, &balances)
            }
            PoolUpdate::SetTokenApproved { pool, token, value } => {
                self.set_token_approved(&pool, token, value)
            }
            PoolUpdate::SetInitialised(value) => {
                self.set_initialised(value);
                true
            }
        }
    }

    /// Insert a pool or replace its chain-derived fields.
    pub fn upsert_pool(&mut self, mut snapshot: PoolSnapshot) {
        let state = Arc::make_mut(&mut self.state);
        if let Some(previous) = state.pools.get(&snapshot.address) {
            snapshot.merge_local(previous);
        } else {
            info!(pool = ?snapshot.address, name = %snapshot.name, "[STORE] pool added");
        }
        state.pools.insert(snapshot.address, snapshot);
        self.publish();
    }

    /// Add `delta` to one quantity of a pool side.
    ///
    /// Settlement balances and supplies clamp at zero; the pending aggregate is signed.
    /// Unknown pools are ignored.
    pub fn apply_balance_delta(
        &mut self,
        pool: &Address,
        side: Side,
        kind: BalanceKind,
        delta: &BigDecimal,
    ) -> bool {
        let changed = self.modify(pool, |snapshot| {
            let slot = snapshot.quantity_mut(side, kind);
            let next = &*slot + delta;
            *slot = match kind {
                BalanceKind::Pending => next,
                BalanceKind::Settlement | BalanceKind::Supply => non_negative(next),
            };
            true
        });
        if !changed {
            debug!(?pool, ?side, ?kind, "[STORE] delta for unknown pool ignored");
        }
        changed
    }

    /// Only the `false -> true` transition is accepted.
    pub fn set_subscribed(&mut self, pool: &Address, value: bool) -> bool {
        self.modify(pool, |snapshot| {
            if snapshot.subscribed || !value {
                return false;
            }
            snapshot.subscribed = true;
            true
        })
    }

    pub fn set_token_balances(&mut self, pool: &Address, balances: &[TokenBalance]) -> bool {
        self.modify(pool, |snapshot| {
            for entry in balances {
                let token = snapshot.token_mut(entry.kind);
                token.balance = entry.balance.clone();
                token.approved = entry.approved;
            }
            !balances.is_empty()
        })
    }

    pub fn set_token_approved(&mut self, pool: &Address, token: TokenKind, value: bool) -> bool {
        self.modify(pool, |snapshot| {
            let token = snapshot.token_mut(token);
            let changed = token.approved != value;
            token.approved = value;
            changed
        })
    }

    pub fn set_initialised(&mut self, value: bool) {
        Arc::make_mut(&mut self.state).initialised = value;
        self.publish();
    }

    /// Copy the record, mutate the copy, swap it in and publish if `f` reports a change.
    fn modify<F>(&mut self, pool: &Address, f: F) -> bool
    where
        F: FnOnce(&mut PoolSnapshot) -> bool,
    {
        let Some(current) = self.state.pools.get(pool) else {
            return false;
        };
        let mut next = current.clone();
        if !f(&mut next) {
            return false;
        }
        Arc::make_mut(&mut self.state).pools.insert(*pool, next);
        self.publish();
        true
    }

    fn publish(&self) {
        self.tx.send_replace(self.state.clone());
    }
}
