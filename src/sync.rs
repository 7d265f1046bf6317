//! Loading pools from the chain and keeping them fresh.

use crate::chain::ChainSource;
use crate::engine::{EngineHandle, EngineMessage};
use crate::errors::Result;
use crate::pool::PoolUpdate;
use crate::utils::unix_now;
use ethers::types::Address;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fetch every pool concurrently and upsert the ones that loaded.
/// Returns the addresses that loaded.
pub async fn load_pools(
    chain: &dyn ChainSource,
    engine: &EngineHandle,
    pools: &[Address],
) -> Result<Vec<Address>> {
    let fetched = join_all(pools.iter().map(|pool| chain.fetch_pool(*pool))).await;
    let mut loaded = Vec::with_capacity(pools.len());
    for (pool, result) in pools.iter().zip(fetched) {
        match result {
            Ok(snapshot) => {
                info!(?pool, name = %snapshot.name, "[INIT] pool loaded");
                engine.dispatch(EngineMessage::Pool(PoolUpdate::Upsert(snapshot)))?;
                loaded.push(*pool);
            }
            Err(e) => warn!(?pool, error = %e, "[INIT] pool fetch failed, skipping"),
        }
    }
    Ok(loaded)
}

/// Load the initial pool set and mark it initialised.
pub async fn initialise(
    chain: &dyn ChainSource,
    engine: &EngineHandle,
    pools: &[Address],
) -> Result<Vec<Address>> {
    let loaded = load_pools(chain, engine, pools).await?;
    engine.dispatch(EngineMessage::Pool(PoolUpdate::SetInitialised(true)))?;
    info!(requested = pools.len(), loaded = loaded.len(), "[INIT] pools initialised");
    Ok(loaded)
}

/// Fetch `account`'s token balances and approvals for every loaded pool.
pub async fn refresh_balances(
    chain: &dyn ChainSource,
    engine: &EngineHandle,
    account: Address,
) -> Result<()> {
    let pools = engine.pools();
    for snapshot in pools.pools.values() {
        match chain.fetch_token_balances(snapshot, account).await {
            Ok(balances) => {
                engine.dispatch(EngineMessage::Pool(PoolUpdate::SetTokenBalances {
                    pool: snapshot.address,
                    balances,
                }))?;
            }
            Err(e) => warn!(pool = ?snapshot.address, error = %e, "[INIT] balance fetch failed"),
        }
    }
    Ok(())
}

/// One resync pass: re-fetch loaded pools, then expire commits whose upkeep
/// deadline passed more than `grace` ago.
pub async fn resync(chain: &dyn ChainSource, engine: &EngineHandle, grace: Duration) -> Result<()> {
    let pools: Vec<Address> = engine.pools().pools.keys().copied().collect();
    let loaded = load_pools(chain, engine, &pools).await?;
    let before = unix_now().saturating_sub(grace.as_secs());
    engine.dispatch(EngineMessage::ExpireCommits { before })?;
    info!(pools = loaded.len(), before, "[RESYNC] pass complete");
    Ok(())
}

/// Spawn a background task running [`resync`] every `interval`.
pub fn spawn_resync_watcher(
    chain: Arc<dyn ChainSource>,
    engine: EngineHandle,
    interval: Duration,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = resync(chain.as_ref(), &engine, grace).await {
                warn!(error = %e, "[RESYNC] stopping");
                break;
            }
        }
    })
}
