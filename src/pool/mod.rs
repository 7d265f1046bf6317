//! Pool snapshots and the store that owns them.

pub mod pricing;
pub mod state;
pub mod store;

pub use pricing::{BalanceOverSupply, TokenPricing};
pub use state::{PoolSnapshot, Token, TokenBalance};
pub use store::{PoolMap, PoolStateStore, PoolUpdate, PoolsState};
