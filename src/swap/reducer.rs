use crate::errors::{AppError, Result};
use crate::markets::Markets;
use crate::models::{BalanceType, CommitAction, Side};
use crate::swap::state::{DEFAULT_LEVERAGE, InvalidAmount, SwapConfiguration};
use ethers::types::Address;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum SwapAction {
    SetAmount(String),
    SetCommitAction(CommitAction),
    SetBalanceType(BalanceType),
    SetMarket(String),
    SetPoolFromMarket(String),
    SetMarkets(Markets),
    SetLeverage(u32),
    SetPoolFromLeverage(u32),
    SetSelectedPool(Address),
    SetInvalidAmount(InvalidAmount),
    SetSide(Side),
    Reset,
}

/// Apply `action` to `state`, returning the next state.
///
/// A rejected transition returns an error and the caller keeps `state`.
pub fn reduce(state: &SwapConfiguration, action: SwapAction) -> Result<SwapConfiguration> {
    let mut next = state.clone();
    match action {
        SwapAction::SetAmount(amount) => next.amount = amount,
        SwapAction::SetCommitAction(action) => next.commit_action = action,
        SwapAction::SetBalanceType(balance_type) => next.balance_type = balance_type,
        SwapAction::SetSide(side) => next.side = Some(side),
        SwapAction::SetSelectedPool(pool) => next.selected_pool = Some(pool),
        SwapAction::SetInvalidAmount(invalid) => next.invalid_amount = invalid,
        SwapAction::SetMarkets(markets) => next.markets = markets,
        SwapAction::SetMarket(market) => {
            next.market = market;
            next.leverage = Some(DEFAULT_LEVERAGE);
        }
        SwapAction::SetLeverage(leverage) | SwapAction::SetPoolFromLeverage(leverage) => {
            next.leverage = Some(leverage);
            next.selected_pool = next.pools_at(leverage).first().map(|p| p.address);
            debug!(leverage, pool = ?next.selected_pool, "[SWAP] pool from leverage");
        }
        SwapAction::SetPoolFromMarket(market) => {
            let Some(tiers) = state.markets.get(&market) else {
                warn!(%market, "[SWAP] market not loaded");
                return Err(unsatisfiable(market, None));
            };
            let leverage = if tiers.get(&DEFAULT_LEVERAGE).is_some_and(|p| !p.is_empty()) {
                DEFAULT_LEVERAGE
            } else {
                match tiers.iter().find(|(_, pools)| !pools.is_empty()) {
                    Some((leverage, _)) => *leverage,
                    None => return Err(unsatisfiable(market, Some(DEFAULT_LEVERAGE))),
                }
            };
            let pool = tiers[&leverage][0].address;
            debug!(%market, leverage, ?pool, "[SWAP] pool from market");
            next.market = market;
            next.leverage = Some(leverage);
            next.side = Some(state.side.unwrap_or(Side::Long));
            next.selected_pool = Some(pool);
        }
        SwapAction::Reset => {
            next = SwapConfiguration {
                commit_action: state.commit_action,
                ..SwapConfiguration::default()
            };
        }
    }
    Ok(next)
}

fn unsatisfiable(market: String, leverage: Option<u32>) -> AppError {
    AppError::ConfigurationUnsatisfiable { market, leverage }
}
