use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Contract error: {0}")]
    Contract(
        #[from] ethers::contract::ContractError<ethers::providers::Provider<ethers::providers::Ws>>,
    ),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Submission rejected or reverted. Nothing was mutated; retry is a fresh user action.
    #[error("Transaction failed: {0}")]
    Submission(String),

    /// An event or command referenced a pool or commit this process does not know.
    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("No pool for market {market} at leverage {leverage:?}")]
    ConfigurationUnsatisfiable {
        market: String,
        leverage: Option<u32>,
    },

    /// A component tried to reach a collaborator that is gone (e.g. the engine queue closed).
    #[error("Missing collaborator: {0}")]
    MissingContext(&'static str),

    #[error("Amount error: {0}")]
    Amount(String),

    #[error("Other: {0}")]
    Other(String),
}

impl AppError {
    /// Errors that are expected under eventual-consistency races and never shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, AppError::StaleReference(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stale_references_are_silent() {
        assert!(AppError::StaleReference("pool 0x0".into()).is_silent());
        assert!(!AppError::Submission("reverted".into()).is_silent());
        assert!(!AppError::MissingContext("engine").is_silent());
    }

    #[test]
    fn unsatisfiable_message_names_market() {
        let err = AppError::ConfigurationUnsatisfiable {
            market: "BTC/USD".into(),
            leverage: Some(3),
        };
        assert_eq!(err.to_string(), "No pool for market BTC/USD at leverage Some(3)");
    }
}
