use crate::markets::parse_pool_name;
use crate::models::{BalanceKind, Side, TokenKind};
use bigdecimal::BigDecimal;
use ethers::types::Address;
use num_traits::Zero;

/// One of the three tokens a pool references, as seen by the active account.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub address: Address,
    pub name: String,
    pub decimals: u8,
    /// Balance held by the active account (zero when no account is set).
    pub balance: BigDecimal,
    /// Whether the active account has approved the pool to spend this token.
    pub approved: bool,
    pub supply: BigDecimal,
}

impl Token {
    pub fn new(address: Address, name: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            name: name.into(),
            decimals,
            balance: BigDecimal::zero(),
            approved: false,
            supply: BigDecimal::zero(),
        }
    }
}

/// Account-scoped balance for one token, as fetched from the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenBalance {
    pub kind: TokenKind,
    pub balance: BigDecimal,
    pub approved: bool,
}

/// Immutable snapshot of a leveraged pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
    pub address: Address,
    /// Pool name, e.g. `3-BTC/USD`.
    pub name: String,
    /// Seconds between upkeeps.
    pub update_interval: u64,
    /// Seconds before an upkeep after which new commits roll into the next interval.
    pub front_running_interval: u64,
    pub last_update_timestamp: u64,
    pub leverage: u32,
    pub long_balance: BigDecimal,
    pub short_balance: BigDecimal,
    pub oracle_price: BigDecimal,
    pub quote_token: Token,
    pub long_token: Token,
    pub short_token: Token,
    pub committer_address: Address,
    pub pending_long: BigDecimal,
    pub pending_short: BigDecimal,
    pub subscribed: bool,
    /// Block the chain-derived fields were read at; 0 when unknown.
    pub synced_block: u64,
}

impl PoolSnapshot {
    /// Minimal snapshot with zeroed balances; leverage is taken from the name.
    pub fn new(
        address: Address,
        name: impl Into<String>,
        committer_address: Address,
        quote_token: Token,
        long_token: Token,
        short_token: Token,
    ) -> Self {
        let name = name.into();
        let leverage = parse_pool_name(&name).map(|(l, _)| l).unwrap_or(1);
        Self {
            address,
            name,
            update_interval: 0,
            front_running_interval: 0,
            last_update_timestamp: 0,
            leverage,
            long_balance: BigDecimal::zero(),
            short_balance: BigDecimal::zero(),
            oracle_price: BigDecimal::zero(),
            quote_token,
            long_token,
            short_token,
            committer_address,
            pending_long: BigDecimal::zero(),
            pending_short: BigDecimal::zero(),
            subscribed: false,
            synced_block: 0,
        }
    }

    pub fn token(&self, kind: TokenKind) -> &Token {
        match kind {
            TokenKind::Quote => &self.quote_token,
            TokenKind::Long => &self.long_token,
            TokenKind::Short => &self.short_token,
        }
    }

    pub fn token_mut(&mut self, kind: TokenKind) -> &mut Token {
        match kind {
            TokenKind::Quote => &mut self.quote_token,
            TokenKind::Long => &mut self.long_token,
            TokenKind::Short => &mut self.short_token,
        }
    }

    pub fn side_token(&self, side: Side) -> &Token {
        self.token(side.into())
    }

    pub fn balance(&self, side: Side) -> &BigDecimal {
        match side {
            Side::Long => &self.long_balance,
            Side::Short => &self.short_balance,
        }
    }

    pub fn pending(&self, side: Side) -> &BigDecimal {
        match side {
            Side::Long => &self.pending_long,
            Side::Short => &self.pending_short,
        }
    }

    /// The stored quantity a balance delta for `(side, kind)` targets.
    pub fn quantity_mut(&mut self, side: Side, kind: BalanceKind) -> &mut BigDecimal {
        match (kind, side) {
            (BalanceKind::Settlement, Side::Long) => &mut self.long_balance,
            (BalanceKind::Settlement, Side::Short) => &mut self.short_balance,
            (BalanceKind::Supply, Side::Long) => &mut self.long_token.supply,
            (BalanceKind::Supply, Side::Short) => &mut self.short_token.supply,
            (BalanceKind::Pending, Side::Long) => &mut self.pending_long,
            (BalanceKind::Pending, Side::Short) => &mut self.pending_short,
        }
    }

    /// Timestamp of the next upkeep.
    pub fn deadline_upkeep(&self) -> u64 {
        self.last_update_timestamp + self.update_interval
    }

    /// Last moment a commit still makes the next upkeep.
    pub fn deadline_front_running_cutoff(&self) -> u64 {
        self.deadline_upkeep()
            .saturating_sub(self.front_running_interval)
    }

    /// Carry over fields a chain re-fetch cannot know about.
    pub(crate) fn merge_local(&mut self, previous: &PoolSnapshot) {
        self.subscribed |= previous.subscribed;
        for kind in [TokenKind::Quote, TokenKind::Long, TokenKind::Short] {
            let prev = previous.token(kind);
            let token = self.token_mut(kind);
            if token.address == prev.address {
                token.balance = prev.balance.clone();
                token.approved = prev.approved;
            }
        }
    }

    /// Keep `previous`'s balances, supplies and pending aggregates.
    ///
    /// Used when this snapshot was read at an older block than events already
    /// applied to `previous`.
    pub(crate) fn keep_quantities(&mut self, previous: &PoolSnapshot) {
        self.long_balance = previous.long_balance.clone();
        self.short_balance = previous.short_balance.clone();
        self.pending_long = previous.pending_long.clone();
        self.pending_short = previous.pending_short.clone();
        for kind in [TokenKind::Long, TokenKind::Short] {
            let prev = previous.token(kind);
            let token = self.token_mut(kind);
            if token.address == prev.address {
                token.supply = prev.supply.clone();
            }
        }
        self.synced_block = previous.synced_block;
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn deadlines_follow_intervals() {
        let pool = btc_pool(addr(0xaa));
        assert_eq!(pool.deadline_upkeep(), 1_700_003_600);
        assert_eq!(pool.deadline_front_running_cutoff(), 1_700_003_300);
    }

    #[test]
    fn leverage_comes_from_name() {
        let pool = btc_pool(addr(0xaa));
        assert_eq!(pool.leverage, 3);
        let unnamed = PoolSnapshot::new(
            addr(0xab),
            "BTC/USD",
            addr(0xc0),
            Token::new(addr(0x01), "USDC", 6),
            Token::new(addr(0x02), "L", 6),
            Token::new(addr(0x03), "S", 6),
        );
        assert_eq!(unnamed.leverage, 1);
    }

    #[test]
    fn stale_snapshot_keeps_local_quantities() {
        let mut local = btc_pool(addr(0xaa));
        local.synced_block = 10;
        local.pending_long = BigDecimal::from(100);
        local.long_token.supply = BigDecimal::from(600);

        let mut fetched = btc_pool(addr(0xaa));
        fetched.synced_block = 8;
        fetched.oracle_price = BigDecimal::from(43_000);
        fetched.keep_quantities(&local);

        assert_eq!(fetched.pending_long, BigDecimal::from(100));
        assert_eq!(fetched.long_token.supply, BigDecimal::from(600));
        assert_eq!(fetched.synced_block, 10);
        assert_eq!(fetched.oracle_price, BigDecimal::from(43_000));
    }

    #[test]
    fn merge_keeps_subscription_and_account_fields() {
        let mut previous = btc_pool(addr(0xaa));
        previous.subscribed = true;
        previous.quote_token.approved = true;
        previous.quote_token.balance = BigDecimal::from(7);

        let mut fresh = btc_pool(addr(0xaa));
        fresh.long_balance = BigDecimal::from(1234);
        fresh.merge_local(&previous);

        assert!(fresh.subscribed);
        assert!(fresh.quote_token.approved);
        assert_eq!(fresh.quote_token.balance, BigDecimal::from(7));
        assert_eq!(fresh.long_balance, BigDecimal::from(1234));
    }
}
