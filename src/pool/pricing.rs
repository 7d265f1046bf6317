use crate::models::Side;
use crate::pool::state::PoolSnapshot;
use bigdecimal::BigDecimal;
use num_traits::{One, Zero};

/// Price of one pool token in quote units. Used to annotate values only.
pub trait TokenPricing: Send + Sync {
    fn token_price(&self, pool: &PoolSnapshot, side: Side) -> BigDecimal;
}

/// Side collateral divided by token supply; an empty side prices at 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceOverSupply;

impl TokenPricing for BalanceOverSupply {
    fn token_price(&self, pool: &PoolSnapshot, side: Side) -> BigDecimal {
        let supply = &pool.side_token(side).supply;
        if supply.is_zero() {
            return BigDecimal::one();
        }
        pool.balance(side) / supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::state::fixtures::{addr, btc_pool};

    #[test]
    fn price_is_balance_per_token() {
        let pool = btc_pool(addr(0xaa));
        assert_eq!(BalanceOverSupply.token_price(&pool, Side::Long), BigDecimal::from(2));
    }

    #[test]
    fn empty_supply_prices_at_one() {
        let mut pool = btc_pool(addr(0xaa));
        pool.short_token.supply = BigDecimal::zero();
        assert_eq!(BalanceOverSupply.token_price(&pool, Side::Short), BigDecimal::one());
    }
}
