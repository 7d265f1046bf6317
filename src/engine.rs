//! Single owner of pool and ledger state.
//!
//! Every mutation arrives as an [`EngineMessage`] on one unbounded queue and is
//! applied in receive order. Results are published through `watch` channels
//! (pools, pending commits) and a `broadcast` channel (notices).

use crate::commits::{
    CommitEvent, CommitReconciler, PendingCommitEntry, PendingCommitLedger, ReconcileContext,
};
use crate::errors::{AppError, Result};
use crate::models::CommitKey;
use crate::notices::Notice;
use crate::pool::{PoolMap, PoolStateStore, PoolUpdate, TokenPricing};
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info};

const NOTICE_CAPACITY: usize = 256;

pub type LedgerView = Arc<Vec<PendingCommitEntry>>;

#[derive(Debug, Clone)]
pub enum EngineMessage {
    Pool(PoolUpdate),
    Commit(CommitEvent),
    /// Drop a ledger entry without waiting for the chain (user cancel succeeded).
    ResolveCommit(CommitKey),
    /// Drop ledger entries whose upkeep deadline is before `before`.
    ExpireCommits { before: u64 },
    SetAccount(Option<Address>),
}

/// Cloneable handle given to every component that reads or mutates engine state.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
    pools: watch::Receiver<PoolMap>,
    ledger: watch::Receiver<LedgerView>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    pub fn dispatch(&self, message: EngineMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| {
            error!("[ENGINE] dispatch after engine stopped");
            AppError::MissingContext("engine queue closed")
        })
    }

    pub fn pools(&self) -> PoolMap {
        self.pools.borrow().clone()
    }

    pub fn watch_pools(&self) -> watch::Receiver<PoolMap> {
        self.pools.clone()
    }

    pub fn pending(&self) -> LedgerView {
        self.ledger.borrow().clone()
    }

    pub fn watch_pending(&self) -> watch::Receiver<LedgerView> {
        self.ledger.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Publish a notice. Having no listeners is not an error.
    pub fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

pub struct Engine {
    store: PoolStateStore,
    ledger: PendingCommitLedger,
    reconciler: CommitReconciler,
    account: Option<Address>,
    pricing: Arc<dyn TokenPricing>,
    rx: mpsc::UnboundedReceiver<EngineMessage>,
    ledger_tx: watch::Sender<LedgerView>,
    notices: broadcast::Sender<Notice>,
}

impl Engine {
    pub fn new(account: Option<Address>, pricing: Arc<dyn TokenPricing>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ledger_tx, ledger_rx) = watch::channel(LedgerView::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let store = PoolStateStore::new();
        let handle = EngineHandle {
            tx,
            pools: store.subscribe(),
            ledger: ledger_rx,
            notices: notices.clone(),
        };
        let engine = Self {
            store,
            ledger: PendingCommitLedger::new(),
            reconciler: CommitReconciler::new(),
            account,
            pricing,
            rx,
            ledger_tx,
            notices,
        };
        (engine, handle)
    }

    pub fn store(&self) -> &PoolStateStore {
        &self.store
    }

    pub fn ledger(&self) -> &PendingCommitLedger {
        &self.ledger
    }

    /// Process messages until every handle is dropped.
    pub async fn run(mut self) {
        info!("[ENGINE] started");
        while let Some(message) = self.rx.recv().await {
            self.apply(message);
        }
        info!("[ENGINE] all handles dropped, stopping");
    }

    /// Apply every message already queued. Returns how many were processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.apply(message);
            processed += 1;
        }
        processed
    }

    pub fn apply(&mut self, message: EngineMessage) {
        let ledger_before = self.ledger.len();
        let notices = match message {
            EngineMessage::Pool(PoolUpdate::Upsert(mut snapshot)) => {
                let seen = self.reconciler.last_block(&snapshot.address);
                if let (Some(seen), Some(previous)) =
                    (seen, self.store.get_snapshot(&snapshot.address))
                {
                    // events newer than the fetch are already applied locally
                    if snapshot.synced_block < seen {
                        debug!(
                            pool = ?snapshot.address,
                            synced = snapshot.synced_block,
                            seen,
                            "[STORE] stale fetch, keeping local quantities"
                        );
                        snapshot.keep_quantities(previous);
                    }
                }
                self.store.upsert_pool(snapshot);
                Vec::new()
            }
            EngineMessage::Pool(update) => {
                self.store.apply(update);
                Vec::new()
            }
            EngineMessage::Commit(event) => {
                let mut ctx = ReconcileContext {
                    store: &mut self.store,
                    ledger: &mut self.ledger,
                    account: self.account,
                    pricing: self.pricing.as_ref(),
                };
                self.reconciler.apply(event, &mut ctx)
            }
            EngineMessage::ResolveCommit(key) => {
                if self.ledger.resolve(&key).is_some() {
                    info!(%key, "[LEDGER] commit resolved ahead of confirmation");
                }
                Vec::new()
            }
            EngineMessage::ExpireCommits { before } => self
                .ledger
                .expire(before)
                .into_iter()
                .map(|entry| {
                    info!(key = %entry.commit_id, "[LEDGER] pending commit expired");
                    Notice::CommitExpired(entry.commit_id)
                })
                .collect(),
            EngineMessage::SetAccount(account) => {
                if account != self.account {
                    debug!(?account, cleared = self.ledger.len(), "[ENGINE] active account changed");
                    self.ledger = PendingCommitLedger::new();
                    self.account = account;
                }
                Vec::new()
            }
        };

        if self.ledger.len() != ledger_before || !notices.is_empty() {
            self.publish_ledger();
        }
        for notice in notices {
            let _ = self.notices.send(notice);
        }
    }

    fn publish_ledger(&self) {
        let entries: Vec<PendingCommitEntry> = self.ledger.entries().cloned().collect();
        self.ledger_tx.send_replace(Arc::new(entries));
    }
}
