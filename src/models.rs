//! Shared data structures used throughout the application.

use bigdecimal::BigDecimal;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a pool a leveraged token tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

/// Whether the user is minting (buying) or burning (selling) pool tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommitAction {
    #[default]
    Mint,
    Burn,
}

/// Where the tokens being spent are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalanceType {
    #[default]
    Wallet,
    Escrow,
}

/// Commit kinds as encoded by the committer contract (`uint8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitType {
    ShortMint = 0,
    ShortBurn = 1,
    LongMint = 2,
    LongBurn = 3,
}

impl CommitType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(CommitType::ShortMint),
            1 => Some(CommitType::ShortBurn),
            2 => Some(CommitType::LongMint),
            3 => Some(CommitType::LongBurn),
            _ => None,
        }
    }

    pub fn from_parts(action: CommitAction, side: Side) -> Self {
        match (action, side) {
            (CommitAction::Mint, Side::Long) => CommitType::LongMint,
            (CommitAction::Burn, Side::Long) => CommitType::LongBurn,
            (CommitAction::Mint, Side::Short) => CommitType::ShortMint,
            (CommitAction::Burn, Side::Short) => CommitType::ShortBurn,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn side(self) -> Side {
        match self {
            CommitType::LongMint | CommitType::LongBurn => Side::Long,
            CommitType::ShortMint | CommitType::ShortBurn => Side::Short,
        }
    }

    pub fn is_mint(self) -> bool {
        matches!(self, CommitType::LongMint | CommitType::ShortMint)
    }

    /// Amount as it contributes to the pending aggregate: mints add, burns subtract.
    pub fn signed(self, amount: &BigDecimal) -> BigDecimal {
        if self.is_mint() {
            amount.clone()
        } else {
            -amount.clone()
        }
    }
}

/// The three tokens a pool references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Quote,
    Long,
    Short,
}

impl From<Side> for TokenKind {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => TokenKind::Long,
            Side::Short => TokenKind::Short,
        }
    }
}

/// Per-side pool quantities a balance delta can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceKind {
    /// Quote-token collateral backing the side.
    Settlement,
    /// Outstanding supply of the side's pool token.
    Supply,
    /// Signed aggregate of commits not yet executed.
    Pending,
}

/// Position of an event in the chain: the idempotency key for event handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

/// Commit ids are assigned per committer, so the pool is part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitKey {
    pub pool: Address,
    pub id: u128,
}

impl fmt::Display for CommitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.pool, self.id)
    }
}
