//! Market index derived from pool names.
//!
//! Pools are named `<leverage>-<MARKET>`, e.g. `3-BTC/USD`. The index groups
//! pools by market symbol and leverage tier; it is recomputed whenever the
//! pool set changes and never stored on its own.

use crate::pool::PoolsState;
use ethers::types::Address;
use std::collections::BTreeMap;

/// A pool offering a market at some leverage tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketPool {
    pub address: Address,
    pub name: String,
}

/// market symbol -> leverage -> pools, ordered by address.
pub type Markets = BTreeMap<String, BTreeMap<u32, Vec<MarketPool>>>;

/// Split a pool name into leverage and market symbol.
pub fn parse_pool_name(name: &str) -> Option<(u32, String)> {
    let (leverage, market) = name.trim().split_once('-')?;
    let leverage: u32 = leverage.trim().parse().ok()?;
    let market = market.trim();
    if leverage == 0 || market.is_empty() {
        return None;
    }
    Some((leverage, market.to_string()))
}

pub fn derive_markets(state: &PoolsState) -> Markets {
    let mut markets = Markets::new();
    for pool in state.pools.values() {
        let Some((leverage, market)) = parse_pool_name(&pool.name) else {
            tracing::debug!(pool = ?pool.address, name = %pool.name, "[SWAP] unparsable pool name");
            continue;
        };
        markets
            .entry(market)
            .or_default()
            .entry(leverage)
            .or_default()
            .push(MarketPool {
                address: pool.address,
                name: pool.name.clone(),
            });
    }
    for tiers in markets.values_mut() {
        for pools in tiers.values_mut() {
            pools.sort_by_key(|p| p.address);
        }
    }
    markets
}
