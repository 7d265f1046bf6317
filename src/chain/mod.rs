//! Ports to the chain: reads, event subscriptions and transaction submission.

use crate::commits::CommitLog;
use crate::errors::Result;
use crate::models::CommitType;
use crate::pool::{PoolSnapshot, TokenBalance};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use futures::Stream;
use std::pin::Pin;

pub mod client;

pub use client::EthersChain;

pub type CommitLogStream = Pin<Box<dyn Stream<Item = CommitLog> + Send>>;

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Pool metadata, balances and committer pending amounts at the latest block.
    async fn fetch_pool(&self, pool: Address) -> Result<PoolSnapshot>;

    /// Balances and approvals of `account` for the pool's three tokens.
    async fn fetch_token_balances(
        &self,
        pool: &PoolSnapshot,
        account: Address,
    ) -> Result<Vec<TokenBalance>>;

    /// Live stream of every commit event the committer emits.
    async fn subscribe_commits(&self, committer: Address) -> Result<CommitLogStream>;

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Option<Address>>;
}

/// Calls the orchestrator asks the transaction handler to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Commit {
        committer: Address,
        commit_type: CommitType,
        amount: U256,
    },
    Uncommit {
        committer: Address,
        id: u128,
    },
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessages {
    pub waiting: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    /// `false` when the transaction was included but reverted.
    pub succeeded: bool,
}

/// Signs and broadcasts calls; resolves once the transaction is included.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn submit(&self, call: ContractCall, messages: &StatusMessages) -> Result<TxReceipt>;
}
