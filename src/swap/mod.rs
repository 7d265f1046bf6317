//! Mint/burn form state.
//!
//! [`reduce`] is a pure transition function. [`SwapSession`] owns the current
//! configuration, keeps the market index in step with the pool set and
//! re-validates the selection whenever the index changes.

pub mod reducer;
pub mod state;

pub use reducer::{SwapAction, reduce};
pub use state::{DEFAULT_LEVERAGE, InvalidAmount, SwapConfiguration};

use crate::errors::{AppError, Result};
use crate::markets::{derive_markets, parse_pool_name};
use crate::models::Side;
use crate::pool::PoolsState;
use bigdecimal::BigDecimal;
use ethers::types::Address;
use std::str::FromStr;
use tracing::{debug, info};

/// Keep the selection consistent with the current index.
///
/// A selection no longer offered at the current market and leverage moves to
/// the first pool there, or is cleared when the tier is empty.
pub fn reconcile_selection(state: &SwapConfiguration) -> SwapConfiguration {
    let mut next = state.clone();
    if next.selected_pool.is_none() || next.selection_is_valid() {
        return next;
    }
    next.selected_pool = next
        .leverage
        .and_then(|leverage| next.pools_at(leverage).first().map(|p| p.address));
    next
}

/// Check a typed amount against the spendable balance.
pub fn is_invalid_amount(amount: &str, balance: &BigDecimal, decimals: u8) -> InvalidAmount {
    let amount = amount.trim();
    if amount.is_empty() {
        return InvalidAmount::valid();
    }
    let Ok(value) = BigDecimal::from_str(amount) else {
        return InvalidAmount::invalid("Amount is not a number");
    };
    if value < BigDecimal::from(0) {
        return InvalidAmount::invalid("Amount must be positive");
    }
    let (_, scale) = value.normalized().as_bigint_and_exponent();
    if scale > decimals as i64 {
        return InvalidAmount::invalid(format!("Amount supports at most {decimals} decimals"));
    }
    if &value > balance {
        return InvalidAmount::invalid(format!("Insufficient funds, balance is {balance}"));
    }
    InvalidAmount::valid()
}

#[derive(Debug, Default)]
pub struct SwapSession {
    state: SwapConfiguration,
}

impl SwapSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SwapConfiguration {
        &self.state
    }

    /// Apply an action. On rejection the previous state is kept.
    pub fn dispatch(&mut self, action: SwapAction) -> Result<&SwapConfiguration> {
        match reduce(&self.state, action) {
            Ok(next) => {
                self.state = next;
                Ok(&self.state)
            }
            Err(e) => {
                debug!(error = %e, "[SWAP] transition rejected");
                Err(e)
            }
        }
    }

    /// Rebuild the market index from `pools` and re-validate the selection.
    pub fn refresh_markets(&mut self, pools: &PoolsState) -> &SwapConfiguration {
        let markets = derive_markets(pools);
        let mut next = self.state.clone();
        next.markets = markets;
        self.state = reconcile_selection(&next);
        debug!(markets = self.state.markets.len(), "[SWAP] markets refreshed");
        &self.state
    }

    /// Select `pool` directly, taking market and leverage from its name.
    pub fn focus_pool(&mut self, pools: &PoolsState, pool: Address) -> Result<&SwapConfiguration> {
        let name = match pools.pools.get(&pool) {
            Some(snapshot) => snapshot.name.clone(),
            None => {
                return Err(AppError::StaleReference(format!(
                    "pool {pool:?} not loaded"
                )));
            }
        };
        let Some((leverage, market)) = parse_pool_name(&name) else {
            return Err(AppError::ConfigurationUnsatisfiable {
                market: name,
                leverage: None,
            });
        };
        let mut next = self.state.clone();
        next.market = market;
        next.leverage = Some(leverage);
        next.selected_pool = Some(pool);
        if next.side.is_none() {
            next.side = Some(Side::Long);
        }
        info!(?pool, market = %next.market, leverage, "[SWAP] focused pool");
        self.state = next;
        Ok(&self.state)
    }

    /// Validate the typed amount against `balance` and push the result in.
    pub fn validate_amount(&mut self, balance: &BigDecimal, decimals: u8) -> &SwapConfiguration {
        let invalid = is_invalid_amount(&self.state.amount, balance, decimals);
        self.state.invalid_amount = invalid;
        &self.state
    }
}
