//! Configuration loader and application settings.

use crate::errors::{AppError, Result};
use ethers::types::Address;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_REGISTRY_PATH: &str = "pools.json";
const DEFAULT_RESYNC_SECS: u64 = 15;
const DEFAULT_EXPIRY_GRACE_SECS: u64 = 300;

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket endpoint of the node.
    pub rpc_ws_url: Url,
    /// Pools to load in addition to the registry.
    pub pool_addresses: Vec<Address>,
    /// Connected account; commits it creates are tracked as pending.
    pub account: Option<Address>,
    /// JSON file of imported pools.
    pub registry_path: PathBuf,
    pub resync_interval: Duration,
    /// How long past its upkeep deadline a pending commit is kept.
    pub expiry_grace: Duration,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_ws_url = get("RPC_WS_URL")
            .ok_or_else(|| AppError::Config("set RPC_WS_URL to the node websocket endpoint".into()))?;
        let rpc_ws_url = Url::parse(rpc_ws_url.trim())?;
        if !matches!(rpc_ws_url.scheme(), "ws" | "wss") {
            return Err(AppError::Config(format!(
                "RPC_WS_URL must be a ws:// or wss:// url, got {rpc_ws_url}"
            )));
        }

        let pool_addresses = match get("POOL_ADDRESSES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_address("POOL_ADDRESSES", s))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let account = get("ACCOUNT")
            .map(|s| parse_address("ACCOUNT", s.trim()))
            .transpose()?;

        let registry_path = get("POOL_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH));

        let resync_interval = Duration::from_secs(parse_secs(
            get("RESYNC_INTERVAL_SECS"),
            "RESYNC_INTERVAL_SECS",
            DEFAULT_RESYNC_SECS,
        )?);
        if resync_interval.is_zero() {
            return Err(AppError::Config("RESYNC_INTERVAL_SECS must be positive".into()));
        }
        let expiry_grace = Duration::from_secs(parse_secs(
            get("EXPIRY_GRACE_SECS"),
            "EXPIRY_GRACE_SECS",
            DEFAULT_EXPIRY_GRACE_SECS,
        )?);

        Ok(Self {
            rpc_ws_url,
            pool_addresses,
            account,
            registry_path,
            resync_interval,
            expiry_grace,
        })
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|e| AppError::Config(format!("{key}: invalid address {raw}: {e}")))
}

fn parse_secs(raw: Option<String>, key: &str, default: u64) -> Result<u64> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} must be a whole number of seconds: {e}"))),
        None => Ok(default),
    }
}
