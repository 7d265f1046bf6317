//! Per-pool subscription to committer events.

use crate::chain::ChainSource;
use crate::commits::{CommitEvent, CommitEventKind, CommitLog};
use crate::engine::{EngineHandle, EngineMessage};
use crate::errors::{AppError, Result};
use crate::pool::PoolUpdate;
use ethers::types::Address;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Registers committer event handlers at most once per pool.
///
/// Each subscription forwards events onto the engine queue from its own task.
/// Creation events are held until the originating transaction's sender is
/// known, so per-pool ordering is preserved.
pub struct EventSubscriptionManager {
    chain: Arc<dyn ChainSource>,
    engine: EngineHandle,
    states: HashMap<Address, SubscriptionState>,
    forwarders: Vec<JoinHandle<()>>,
}

impl EventSubscriptionManager {
    pub fn new(chain: Arc<dyn ChainSource>, engine: EngineHandle) -> Self {
        Self {
            chain,
            engine,
            states: HashMap::new(),
            forwarders: Vec::new(),
        }
    }

    pub fn state(&self, pool: &Address) -> SubscriptionState {
        self.states
            .get(pool)
            .copied()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Subscribe to the pool's committer. Returns `false` if already subscribed.
    pub async fn subscribe(&mut self, pool: Address) -> Result<bool> {
        if self.state(&pool) != SubscriptionState::Unsubscribed {
            debug!(?pool, "[EVENTS] already subscribed");
            return Ok(false);
        }
        let committer = {
            let pools = self.engine.pools();
            let Some(snapshot) = pools.pools.get(&pool) else {
                return Err(AppError::StaleReference(format!("pool {pool:?} not loaded")));
            };
            if snapshot.subscribed {
                self.states.insert(pool, SubscriptionState::Subscribed);
                return Ok(false);
            }
            snapshot.committer_address
        };

        self.states.insert(pool, SubscriptionState::Subscribing);
        let stream = match self.chain.subscribe_commits(committer).await {
            Ok(stream) => stream,
            Err(e) => {
                self.states.insert(pool, SubscriptionState::Unsubscribed);
                warn!(?pool, error = %e, "[EVENTS] subscription failed");
                return Err(e);
            }
        };

        let chain = self.chain.clone();
        let engine = self.engine.clone();
        self.forwarders.push(tokio::spawn(async move {
            let mut stream = stream;
            while let Some(log) = stream.next().await {
                let event = attribute(chain.as_ref(), pool, log).await;
                if engine.dispatch(EngineMessage::Commit(event)).is_err() {
                    break;
                }
            }
            debug!(?pool, "[EVENTS] forwarder finished");
        }));

        self.engine.dispatch(EngineMessage::Pool(PoolUpdate::SetSubscribed {
            pool,
            value: true,
        }))?;
        self.states.insert(pool, SubscriptionState::Subscribed);
        info!(?pool, ?committer, "[EVENTS] subscribed to committer");
        Ok(true)
    }

    /// Number of live forwarding tasks.
    pub fn active(&self) -> usize {
        self.forwarders.iter().filter(|h| !h.is_finished()).count()
    }
}

/// Attach the pool and, for creations, the sender of the originating transaction.
async fn attribute(chain: &dyn ChainSource, pool: Address, log: CommitLog) -> CommitEvent {
    let kind = match log.kind {
        CommitEventKind::Created {
            id,
            amount,
            commit_type,
            sender: None,
        } => {
            let sender = match chain.transaction_sender(log.log.tx_hash).await {
                Ok(sender) => sender,
                Err(e) => {
                    warn!(?pool, id, error = %e, "[EVENTS] could not resolve commit sender");
                    None
                }
            };
            CommitEventKind::Created {
                id,
                amount,
                commit_type,
                sender,
            }
        }
        other => other,
    };
    CommitEvent {
        pool,
        log: log.log,
        kind,
    }
}
