use crate::chain::{ChainSource, CommitLogStream};
use crate::commits::{CommitEventKind, CommitLog};
use crate::errors::{AppError, Result};
use crate::models::{CommitType, LogKey, TokenKind};
use crate::pool::{PoolSnapshot, Token, TokenBalance};
use crate::utils::to_decimal;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use ethers::{
    abi::RawLog,
    contract::{EthLogDecode, abigen},
    providers::{Middleware, Provider, Ws},
    types::{Address, BlockId, Filter, H256, I256, Log, U256},
};
use futures::StreamExt;
use num_bigint::BigInt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

abigen!(
    LeveragedPool,
    r"[
        function poolName() view returns (string)
        function updateInterval() view returns (uint32)
        function frontRunningInterval() view returns (uint32)
        function lastPriceTimestamp() view returns (uint256)
        function longBalance() view returns (uint256)
        function shortBalance() view returns (uint256)
        function quoteToken() view returns (address)
        function tokens(uint256) view returns (address)
        function poolCommitter() view returns (address)
        function getOraclePrice() view returns (int256)
    ]",
);

abigen!(
    PoolCommitter,
    r"[
        event CreateCommit(uint128 indexed id, uint256 indexed amount, uint8 indexed commitType)
        event RemoveCommit(uint128 indexed id, uint256 indexed amount, uint8 indexed commitType)
        event ExecuteCommit(uint128 id, uint256 amount, uint8 commitType)
        event FailedCommitExecution()
        function shadowPools(uint256) view returns (uint256)
    ]",
);

abigen!(
    Erc20,
    r"[
        function name() view returns (string)
        function decimals() view returns (uint8)
        function totalSupply() view returns (uint256)
        function balanceOf(address) view returns (uint256)
        function allowance(address, address) view returns (uint256)
    ]",
);

/// Allowances at or above this many whole tokens count as an unlimited approval.
const APPROVED_ALLOWANCE: u64 = 9_007_199_254_740_991;

/// Oracle prices are reported with 18 decimals.
const ORACLE_DECIMALS: i64 = 18;

/// Chain source over a websocket provider.
#[derive(Clone)]
pub struct EthersChain {
    provider: Arc<Provider<Ws>>,
}

impl EthersChain {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let provider = Provider::<Ws>::connect(ws_url).await?;
        let chain_id = provider.get_chainid().await?; // sanity-check
        info!(%chain_id, "[INIT] connected to chain");
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    async fn fetch_token(&self, address: Address, at: BlockId) -> Result<Token> {
        let token = Erc20::new(address, self.provider.clone());
        let name = token.name().block(at).call().await?;
        let decimals = token.decimals().block(at).call().await?;
        let supply = token.total_supply().block(at).call().await?;
        let mut out = Token::new(address, name, decimals);
        out.supply = to_decimal(supply, decimals);
        Ok(out)
    }
}

#[async_trait]
impl ChainSource for EthersChain {
    async fn fetch_pool(&self, address: Address) -> Result<PoolSnapshot> {
        // every read is pinned to one block so the snapshot is consistent
        let block = self.provider.get_block_number().await?.as_u64();
        let at = BlockId::from(block);

        let pool = LeveragedPool::new(address, self.provider.clone());
        let name = pool.pool_name().block(at).call().await?;
        let quote = pool.quote_token().block(at).call().await?;
        let long = pool.tokens(U256::zero()).block(at).call().await?;
        let short = pool.tokens(U256::one()).block(at).call().await?;
        let committer_address = pool.pool_committer().block(at).call().await?;

        let quote_token = self.fetch_token(quote, at).await?;
        let long_token = self.fetch_token(long, at).await?;
        let short_token = self.fetch_token(short, at).await?;
        let decimals = quote_token.decimals;

        let mut snapshot = PoolSnapshot::new(
            address,
            name,
            committer_address,
            quote_token,
            long_token,
            short_token,
        );
        snapshot.synced_block = block;
        snapshot.update_interval = pool.update_interval().block(at).call().await? as u64;
        snapshot.front_running_interval =
            pool.front_running_interval().block(at).call().await? as u64;
        snapshot.last_update_timestamp =
            pool.last_price_timestamp().block(at).call().await?.low_u64();
        snapshot.long_balance = to_decimal(pool.long_balance().block(at).call().await?, decimals);
        snapshot.short_balance = to_decimal(pool.short_balance().block(at).call().await?, decimals);
        snapshot.oracle_price =
            signed_to_decimal(pool.get_oracle_price().block(at).call().await?);

        let committer = PoolCommitter::new(committer_address, self.provider.clone());
        let mut shadow = Vec::with_capacity(4);
        for ty in [
            CommitType::ShortMint,
            CommitType::ShortBurn,
            CommitType::LongMint,
            CommitType::LongBurn,
        ] {
            let raw = committer
                .shadow_pools(U256::from(ty.as_u8()))
                .block(at)
                .call()
                .await?;
            let unit = if ty.is_mint() {
                decimals
            } else {
                snapshot.side_token(ty.side()).decimals
            };
            shadow.push(to_decimal(raw, unit));
        }
        snapshot.pending_short = &shadow[0] - &shadow[1];
        snapshot.pending_long = &shadow[2] - &shadow[3];

        debug!(pool = ?address, name = %snapshot.name, block, "[RESYNC] pool fetched");
        Ok(snapshot)
    }

    async fn fetch_token_balances(
        &self,
        pool: &PoolSnapshot,
        account: Address,
    ) -> Result<Vec<TokenBalance>> {
        let threshold = BigDecimal::from(APPROVED_ALLOWANCE);
        let mut balances = Vec::with_capacity(3);
        for kind in [TokenKind::Quote, TokenKind::Long, TokenKind::Short] {
            let token = pool.token(kind);
            let contract = Erc20::new(token.address, self.provider.clone());
            let balance = contract.balance_of(account).call().await?;
            let allowance = contract.allowance(account, pool.address).call().await?;
            balances.push(TokenBalance {
                kind,
                balance: to_decimal(balance, token.decimals),
                approved: to_decimal(allowance, token.decimals) >= threshold,
            });
        }
        Ok(balances)
    }

    async fn subscribe_commits(&self, committer: Address) -> Result<CommitLogStream> {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let filter = Filter::new().address(committer);
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                let Some(event) = decode_commit_log(&log) else {
                    continue;
                };
                if tx.unbounded_send(event).is_err() {
                    break;
                }
            }
            warn!(?committer, "[EVENTS] log subscription ended");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::pin(rx)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AppError::Other("log subscription task dropped".into())),
        }
    }

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Option<Address>> {
        let tx = self.provider.get_transaction(tx_hash).await?;
        Ok(tx.map(|t| t.from))
    }
}

fn signed_to_decimal(raw: I256) -> BigDecimal {
    let digits: BigInt = raw.to_string().parse().unwrap_or_default();
    BigDecimal::new(digits, ORACLE_DECIMALS)
}

/// Decode a committer log. Logs without a position (pending blocks) or with an
/// unknown commit type are skipped.
pub(crate) fn decode_commit_log(log: &Log) -> Option<CommitLog> {
    let (Some(block_number), Some(tx_hash), Some(log_index)) =
        (log.block_number, log.transaction_hash, log.log_index)
    else {
        debug!(address = ?log.address, "[EVENTS] log without position skipped");
        return None;
    };
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let decoded = match PoolCommitterEvents::decode_log(&raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "[EVENTS] unrecognised committer log");
            return None;
        }
    };
    let commit_type = |raw: u8| {
        let ty = CommitType::from_u8(raw);
        if ty.is_none() {
            warn!(raw, "[EVENTS] unknown commit type");
        }
        ty
    };
    let kind = match decoded {
        PoolCommitterEvents::CreateCommitFilter(e) => CommitEventKind::Created {
            id: e.id,
            amount: e.amount,
            commit_type: commit_type(e.commit_type)?,
            sender: None,
        },
        PoolCommitterEvents::ExecuteCommitFilter(e) => CommitEventKind::Executed {
            id: e.id,
            amount: e.amount,
            commit_type: commit_type(e.commit_type)?,
        },
        PoolCommitterEvents::RemoveCommitFilter(e) => CommitEventKind::Removed {
            id: e.id,
            amount: e.amount,
            commit_type: commit_type(e.commit_type)?,
        },
        PoolCommitterEvents::FailedCommitExecutionFilter(_) => CommitEventKind::Failed,
    };
    Some(CommitLog {
        log: LogKey {
            block_number: block_number.as_u64(),
            tx_hash,
            log_index: log_index.low_u64(),
        },
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::contract::EthEvent;
    use ethers::types::U64;
    use std::str::FromStr;

    fn topic(value: u64) -> H256 {
        H256::from_low_u64_be(value)
    }

    fn positioned(topics: Vec<H256>) -> Log {
        Log {
            topics,
            block_number: Some(U64::from(9u64)),
            transaction_hash: Some(H256::repeat_byte(0x11)),
            log_index: Some(U256::from(4)),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_create_commit() {
        let log = positioned(vec![
            CreateCommitFilter::signature(),
            topic(7),
            topic(100),
            topic(2),
        ]);
        let decoded = decode_commit_log(&log).expect("create commit decodes");
        assert_eq!(decoded.log.log_index, 4);
        assert_eq!(decoded.log.block_number, 9);
        assert_eq!(
            decoded.kind,
            CommitEventKind::Created {
                id: 7,
                amount: U256::from(100),
                commit_type: CommitType::LongMint,
                sender: None,
            }
        );
    }

    #[test]
    fn decodes_failure_without_id() {
        let log = positioned(vec![FailedCommitExecutionFilter::signature()]);
        let decoded = decode_commit_log(&log).expect("failure decodes");
        assert_eq!(decoded.kind, CommitEventKind::Failed);
    }

    #[test]
    fn skips_unknown_commit_type_and_unpositioned_logs() {
        let bad_type = positioned(vec![
            CreateCommitFilter::signature(),
            topic(1),
            topic(1),
            topic(9),
        ]);
        assert!(decode_commit_log(&bad_type).is_none());

        let mut pending = positioned(vec![FailedCommitExecutionFilter::signature()]);
        pending.log_index = None;
        assert!(decode_commit_log(&pending).is_none());
    }

    #[test]
    fn oracle_price_scales_signed_values() {
        let raw = I256::from_dec_str("-1500000000000000000").unwrap();
        assert_eq!(signed_to_decimal(raw), BigDecimal::from_str("-1.5").unwrap());
    }
}
