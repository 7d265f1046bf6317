//! Commit, uncommit and approve submission.
//!
//! State only changes after the handler reports an included, successful
//! transaction. Commits change nothing here: the committer's events do.

use crate::chain::{ContractCall, StatusMessages, TransactionHandler, TxReceipt};
use crate::commits::CancelAction;
use crate::engine::{EngineHandle, EngineMessage};
use crate::errors::{AppError, Result};
use crate::models::{CommitKey, CommitType, TokenKind};
use crate::notices::{Notice, OperationKind, TxStatus};
use crate::pool::{PoolSnapshot, PoolUpdate};
use crate::utils::to_units;
use bigdecimal::BigDecimal;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Commit {
        commit_type: CommitType,
        amount: BigDecimal,
    },
    Uncommit {
        id: u128,
    },
    Approve,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Commit { .. } => OperationKind::Commit,
            Operation::Uncommit { .. } => OperationKind::Uncommit,
            Operation::Approve => OperationKind::Approve,
        }
    }

    fn messages(&self) -> (StatusMessages, &'static str) {
        let (waiting, error, success) = match self {
            Operation::Commit { .. } => ("Submitting commit", "Failed to commit", "Commit submitted"),
            Operation::Uncommit { .. } => (
                "Cancelling commit",
                "Failed to cancel commit",
                "Commit cancelled",
            ),
            Operation::Approve => ("Approving token", "Failed to approve token", "Token approved"),
        };
        let messages = StatusMessages {
            waiting: waiting.to_string(),
            error: error.to_string(),
        };
        (messages, success)
    }

    fn call(&self, pool: &PoolSnapshot) -> Result<ContractCall> {
        Ok(match self {
            Operation::Commit {
                commit_type,
                amount,
            } => {
                // mints spend quote tokens, burns spend the side's pool tokens
                let decimals = if commit_type.is_mint() {
                    pool.quote_token.decimals
                } else {
                    pool.side_token(commit_type.side()).decimals
                };
                ContractCall::Commit {
                    committer: pool.committer_address,
                    commit_type: *commit_type,
                    amount: to_units(amount, decimals)?,
                }
            }
            Operation::Uncommit { id } => ContractCall::Uncommit {
                committer: pool.committer_address,
                id: *id,
            },
            Operation::Approve => ContractCall::Approve {
                token: pool.quote_token.address,
                spender: pool.address,
                amount: U256::MAX,
            },
        })
    }
}

pub struct TransactionOrchestrator {
    handler: Arc<dyn TransactionHandler>,
    engine: EngineHandle,
}

impl TransactionOrchestrator {
    pub fn new(handler: Arc<dyn TransactionHandler>, engine: EngineHandle) -> Self {
        Self { handler, engine }
    }

    pub async fn commit(
        &self,
        pool: Address,
        commit_type: CommitType,
        amount: BigDecimal,
    ) -> Result<TxReceipt> {
        self.submit(
            pool,
            Operation::Commit {
                commit_type,
                amount,
            },
        )
        .await
    }

    pub async fn uncommit(&self, commit: CommitKey) -> Result<TxReceipt> {
        self.submit(commit.pool, Operation::Uncommit { id: commit.id })
            .await
    }

    pub async fn approve(&self, pool: Address) -> Result<TxReceipt> {
        self.submit(pool, Operation::Approve).await
    }

    /// Run the cancel button of a pending commit.
    pub async fn cancel(&self, action: &CancelAction) -> Result<TxReceipt> {
        self.uncommit(action.commit).await
    }

    pub async fn submit(&self, pool: Address, operation: Operation) -> Result<TxReceipt> {
        let Some(snapshot) = self.engine.pools().pools.get(&pool).cloned() else {
            debug!(?pool, "[TX] submission for unknown pool");
            return Err(AppError::StaleReference(format!("pool {pool:?} not loaded")));
        };
        let kind = operation.kind();
        let (messages, success) = operation.messages();

        let call = match operation.call(&snapshot) {
            Ok(call) => call,
            Err(e) => return Err(self.fail(pool, kind, &messages, e.to_string())),
        };

        self.notify(pool, kind, TxStatus::Waiting, messages.waiting.clone());
        let receipt = match self.handler.submit(call, &messages).await {
            Ok(receipt) if receipt.succeeded => receipt,
            Ok(receipt) => {
                let reason = format!("transaction {:?} reverted", receipt.tx_hash);
                return Err(self.fail(pool, kind, &messages, reason));
            }
            Err(e) => return Err(self.fail(pool, kind, &messages, e.to_string())),
        };

        match operation {
            Operation::Approve => self.engine.dispatch(EngineMessage::Pool(
                PoolUpdate::SetTokenApproved {
                    pool,
                    token: TokenKind::Quote,
                    value: true,
                },
            ))?,
            Operation::Uncommit { id } => self
                .engine
                .dispatch(EngineMessage::ResolveCommit(CommitKey { pool, id }))?,
            Operation::Commit { .. } => {}
        }
        info!(?pool, ?kind, tx = ?receipt.tx_hash, "[TX] confirmed");
        self.notify(pool, kind, TxStatus::Success, success.to_string());
        Ok(receipt)
    }

    fn fail(
        &self,
        pool: Address,
        kind: OperationKind,
        messages: &StatusMessages,
        reason: String,
    ) -> AppError {
        let message = format!("{}: {reason}", messages.error);
        warn!(?pool, ?kind, %message, "[TX] submission failed");
        self.notify(pool, kind, TxStatus::Error, message.clone());
        AppError::Submission(message)
    }

    fn notify(&self, pool: Address, operation: OperationKind, status: TxStatus, message: String) {
        self.engine.notify(Notice::Transaction {
            pool,
            operation,
            status,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::{CommitEvent, CommitEventKind};
    use crate::engine::Engine;
    use crate::models::LogKey;
    use crate::pool::BalanceOverSupply;
    use crate::pool::state::fixtures::{addr, btc_pool};
    use async_trait::async_trait;
    use ethers::types::H256;
    use std::str::FromStr;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    enum Outcome {
        Included,
        Reverted,
        Rejected,
    }

    struct MockHandler {
        outcome: Outcome,
        calls: Mutex<Vec<ContractCall>>,
    }

    impl MockHandler {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TransactionHandler for MockHandler {
        async fn submit(&self, call: ContractCall, _messages: &StatusMessages) -> Result<TxReceipt> {
            self.calls.lock().unwrap().push(call);
            let tx_hash = H256::repeat_byte(0xab);
            match self.outcome {
                Outcome::Included => Ok(TxReceipt {
                    tx_hash,
                    succeeded: true,
                }),
                Outcome::Reverted => Ok(TxReceipt {
                    tx_hash,
                    succeeded: false,
                }),
                Outcome::Rejected => Err(AppError::Other("user rejected".into())),
            }
        }
    }

    fn setup(outcome: Outcome) -> (Engine, TransactionOrchestrator, Arc<MockHandler>) {
        let (mut engine, handle) = Engine::new(Some(addr(0xee)), Arc::new(BalanceOverSupply));
        engine.apply(EngineMessage::Pool(PoolUpdate::Upsert(btc_pool(addr(0xaa)))));
        let handler = MockHandler::new(outcome);
        let orchestrator = TransactionOrchestrator::new(handler.clone(), handle);
        (engine, orchestrator, handler)
    }

    fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    fn record_commit(engine: &mut Engine, id: u128) -> CommitKey {
        engine.apply(EngineMessage::Commit(CommitEvent {
            pool: addr(0xaa),
            log: LogKey {
                block_number: id as u64,
                tx_hash: H256::from_low_u64_be(id as u64),
                log_index: 0,
            },
            kind: CommitEventKind::Created {
                id,
                amount: U256::from(1_000_000u64),
                commit_type: CommitType::LongBurn,
                sender: Some(addr(0xee)),
            },
        }));
        CommitKey {
            pool: addr(0xaa),
            id,
        }
    }

    #[tokio::test]
    async fn failed_approve_changes_nothing_and_reports_once() {
        let (mut engine, orchestrator, _) = setup(Outcome::Rejected);
        let mut notices = orchestrator.engine.notices();

        assert!(orchestrator.approve(addr(0xaa)).await.is_err());
        engine.drain();

        let pool = engine.store().get_snapshot(&addr(0xaa)).unwrap();
        assert!(!pool.quote_token.approved);
        let errors = drain_notices(&mut notices)
            .into_iter()
            .filter(Notice::is_error)
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn approve_flips_quote_token_flag() {
        let (mut engine, orchestrator, handler) = setup(Outcome::Included);
        orchestrator.approve(addr(0xaa)).await.unwrap();
        engine.drain();

        assert!(engine.store().get_snapshot(&addr(0xaa)).unwrap().quote_token.approved);
        let calls = handler.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            ContractCall::Approve {
                token: addr(0x01),
                spender: addr(0xaa),
                amount: U256::MAX,
            }
        );
    }

    #[tokio::test]
    async fn cancel_resolves_entry_after_success() {
        let (mut engine, orchestrator, _) = setup(Outcome::Included);
        let key = record_commit(&mut engine, 9);
        let action = engine.ledger().get(&key).unwrap().cancel_action.clone();

        orchestrator.cancel(&action).await.unwrap();
        engine.drain();
        assert!(engine.ledger().get(&key).is_none());
    }

    #[tokio::test]
    async fn reverted_uncommit_keeps_entry() {
        let (mut engine, orchestrator, _) = setup(Outcome::Reverted);
        let key = record_commit(&mut engine, 9);

        let err = orchestrator.uncommit(key).await.unwrap_err();
        engine.drain();
        assert!(matches!(err, AppError::Submission(_)));
        assert!(engine.ledger().get(&key).is_some());
    }

    #[tokio::test]
    async fn commit_converts_amount_and_leaves_state_to_events() {
        let (mut engine, orchestrator, handler) = setup(Outcome::Included);
        let amount = BigDecimal::from_str("12.5").unwrap();
        orchestrator
            .commit(addr(0xaa), CommitType::ShortMint, amount)
            .await
            .unwrap();
        engine.drain();

        assert!(engine.ledger().is_empty());
        assert_eq!(
            handler.calls.lock().unwrap()[0],
            ContractCall::Commit {
                committer: addr(0xc0),
                commit_type: CommitType::ShortMint,
                amount: U256::from(12_500_000u64),
            }
        );
    }

    #[tokio::test]
    async fn burn_amount_uses_pool_token_decimals() {
        let (mut engine, orchestrator, handler) = setup(Outcome::Included);
        let mut pool = btc_pool(addr(0xaa));
        pool.long_token.decimals = 18;
        engine.apply(EngineMessage::Pool(PoolUpdate::Upsert(pool)));

        orchestrator
            .commit(addr(0xaa), CommitType::LongBurn, BigDecimal::from(1))
            .await
            .unwrap();
        engine.drain();

        assert_eq!(
            handler.calls.lock().unwrap()[0],
            ContractCall::Commit {
                committer: addr(0xc0),
                commit_type: CommitType::LongBurn,
                amount: U256::exp10(18),
            }
        );
    }

    #[tokio::test]
    async fn unknown_pool_never_reaches_handler() {
        let (_engine, orchestrator, handler) = setup(Outcome::Included);
        let err = orchestrator.approve(addr(0x77)).await.unwrap_err();
        assert!(err.is_silent());
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn over_precise_amount_is_reported_without_submitting() {
        let (_engine, orchestrator, handler) = setup(Outcome::Included);
        let mut notices = orchestrator.engine.notices();
        let amount = BigDecimal::from_str("0.0000001").unwrap();

        let err = orchestrator
            .commit(addr(0xaa), CommitType::LongMint, amount)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Submission(_)));
        assert!(handler.calls.lock().unwrap().is_empty());
        assert_eq!(drain_notices(&mut notices).len(), 1);
    }
}
