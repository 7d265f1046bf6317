//! User-facing notifications emitted by the engine and the orchestrator.

use crate::commits::CommitNotification;
use crate::models::CommitKey;
use ethers::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Commit,
    Uncommit,
    Approve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Waiting,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Transaction {
        pool: Address,
        operation: OperationKind,
        status: TxStatus,
        message: String,
    },
    /// A commit from the active account was accepted by the chain.
    CommitPending(CommitNotification),
    CommitExecuted(CommitKey),
    CommitCancelled(CommitKey),
    /// The committer reported a failed execution; the event does not say which commit.
    CommitMayHaveFailed { pool: Address },
    CommitExpired(CommitKey),
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::Transaction {
                status: TxStatus::Error,
                ..
            }
        )
    }
}
