use crate::markets::Markets;
use crate::models::{BalanceType, CommitAction, Side};
use ethers::types::Address;

/// Leverage tier selected when a market is chosen without one.
pub const DEFAULT_LEVERAGE: u32 = 10_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvalidAmount {
    pub is_invalid: bool,
    pub message: Option<String>,
}

impl InvalidAmount {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_invalid: true,
            message: Some(message.into()),
        }
    }
}

/// State of the mint/burn form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwapConfiguration {
    pub market: String,
    pub leverage: Option<u32>,
    pub side: Option<Side>,
    pub selected_pool: Option<Address>,
    /// Amount exactly as typed.
    pub amount: String,
    pub commit_action: CommitAction,
    pub balance_type: BalanceType,
    pub invalid_amount: InvalidAmount,
    pub markets: Markets,
}

impl SwapConfiguration {
    /// Pools offering the current market at `leverage`.
    pub fn pools_at(&self, leverage: u32) -> &[crate::markets::MarketPool] {
        self.markets
            .get(&self.market)
            .and_then(|tiers| tiers.get(&leverage))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the selection is one of the pools at the current market and leverage.
    pub fn selection_is_valid(&self) -> bool {
        match (self.selected_pool, self.leverage) {
            (Some(pool), Some(leverage)) => {
                self.pools_at(leverage).iter().any(|p| p.address == pool)
            }
            _ => false,
        }
    }
}
