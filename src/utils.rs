//! Miscellaneous helper utilities.

use crate::errors::{AppError, Result};
use bigdecimal::BigDecimal;
use ethers::types::U256;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Convert a raw token amount into a decimal using the token's decimals.
pub fn to_decimal(raw: U256, decimals: u8) -> BigDecimal {
    let digits = BigInt::parse_bytes(raw.to_string().as_bytes(), 10).unwrap_or_default();
    BigDecimal::new(digits, decimals as i64)
}

/// Convert a decimal amount back to raw token units.
///
/// Fails on negative amounts and on more fractional digits than the token supports.
pub fn to_units(amount: &BigDecimal, decimals: u8) -> Result<U256> {
    if amount.is_negative() {
        return Err(AppError::Amount(format!("negative amount {amount}")));
    }
    let (digits, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > decimals as i64 {
        return Err(AppError::Amount(format!(
            "{amount} has more than {decimals} decimal places"
        )));
    }
    let shift = (decimals as i64 - scale) as u32;
    let raw = digits * BigInt::from(10u32).pow(shift);
    U256::from_dec_str(&raw.to_string())
        .map_err(|e| AppError::Amount(format!("{amount} does not fit in uint256: {e}")))
}

/// Clamp a stored quantity at zero.
pub fn non_negative(value: BigDecimal) -> BigDecimal {
    if value.is_negative() {
        BigDecimal::zero()
    } else {
        value
    }
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
