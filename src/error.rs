use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundlerError {
    #[error("account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("bonding curve account missing for mint {0}")]
    CurveAccountMissing(Pubkey),

    #[error("bonding curve already complete for mint {0}")]
    CurveComplete(Pubkey),

    #[error("invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("lookup table creation failed: {0}")]
    LutCreation(String),

    #[error("lookup table extend failed at page {page}: {reason}")]
    LutExtend { page: usize, reason: String },

    #[error("simulation rejected: {0}")]
    SimulationRejected(String),

    #[error("bundle not confirmed: {0}")]
    BundleNotConfirmed(String),

    #[error("bundle holds {len} transactions, relay accepts at most {max}")]
    BundleTooLarge { len: usize, max: usize },

    #[error("insufficient funds: required={required} available={available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("message compile error: {0}")]
    Compile(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

impl BundlerError {
    /// Errors a best-effort sweep loop logs and steps over instead of aborting.
    pub fn is_sweep_skippable(&self) -> bool {
        matches!(self, Self::SimulationRejected(_))
    }
}

impl From<solana_client::client_error::ClientError> for BundlerError {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Self::Rpc(e.to_string())
    }
}

impl From<reqwest::Error> for BundlerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Relay(e.to_string())
    }
}

impl From<solana_sdk::message::CompileError> for BundlerError {
    fn from(e: solana_sdk::message::CompileError) -> Self {
        Self::Compile(e.to_string())
    }
}

impl From<solana_sdk::signer::SignerError> for BundlerError {
    fn from(e: solana_sdk::signer::SignerError) -> Self {
        Self::Signing(e.to_string())
    }
}

/// Type alias for Result using BundlerError
pub type Result<T> = std::result::Result<T, BundlerError>;
