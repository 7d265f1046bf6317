use anyhow::{Context, Result};
use pool_sync::{
    chain::{ChainSource, EthersChain},
    commits::EventSubscriptionManager,
    config::AppConfig,
    engine::Engine,
    notices::Notice,
    pool::BalanceOverSupply,
    registry::PoolRegistry,
    swap::SwapSession,
    sync, utils,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        url = %config.rpc_ws_url,
        account = ?config.account,
        registry = %config.registry_path.display(),
        "[INIT] pool-sync starting"
    );

    let chain: Arc<dyn ChainSource> = Arc::new(
        EthersChain::connect(config.rpc_ws_url.as_str())
            .await
            .context("connecting to node")?,
    );

    let mut registry = PoolRegistry::load(&config.registry_path).await?;
    registry.adopt(config.pool_addresses.iter().copied()).await?;
    let addresses: Vec<_> = registry.addresses().collect();

    let (engine, handle) = Engine::new(config.account, Arc::new(BalanceOverSupply));
    let engine_task = tokio::spawn(engine.run());

    let loaded = sync::initialise(chain.as_ref(), &handle, &addresses).await?;
    if let Some(account) = config.account {
        sync::refresh_balances(chain.as_ref(), &handle, account).await?;
    }

    let mut subscriptions = EventSubscriptionManager::new(chain.clone(), handle.clone());
    for pool in &loaded {
        if let Err(e) = subscriptions.subscribe(*pool).await {
            tracing::warn!(?pool, error = %e, "[EVENTS] could not subscribe");
        }
    }
    tracing::info!(active = subscriptions.active(), "[INIT] subscriptions established");

    let _resync = sync::spawn_resync_watcher(
        chain.clone(),
        handle.clone(),
        config.resync_interval,
        config.expiry_grace,
    );

    // Notices ---------------------------------------------------------------
    let mut notices = handle.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(Notice::CommitPending(n)) => tracing::info!(
                    message = %n.message,
                    value = %n.value_at_current_price,
                    upkeep = n.deadline_upkeep,
                    cancel = n.cancel_action.label,
                    "[LEDGER] pending commit"
                ),
                Ok(notice) if notice.is_error() => tracing::warn!(?notice, "[ENGINE] notice"),
                Ok(notice) => tracing::info!(?notice, "[ENGINE] notice"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "[ENGINE] notice listener lagged")
                }
                Err(_) => break,
            }
        }
    });

    // Market index follows the pool set -------------------------------------
    let mut pools_rx = handle.watch_pools();
    tokio::spawn(async move {
        let mut session = SwapSession::new();
        loop {
            let pools = pools_rx.borrow_and_update().clone();
            let state = session.refresh_markets(&pools);
            tracing::debug!(
                markets = ?state.markets.keys().collect::<Vec<_>>(),
                selected = ?state.selected_pool,
                "[SWAP] markets"
            );
            if pools_rx.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!(pending = handle.pending().len(), "[ENGINE] shutting down");
    drop(subscriptions);
    drop(handle);
    engine_task.abort();
    Ok(())
}
