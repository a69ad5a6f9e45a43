use crate::provider::ProviderError;
use ethers::types::Address;
use thiserror::Error;

/// Errors reported by [`WalletSession`](crate::session::WalletSession) and
/// [`PaymentResolver`](crate::payment::PaymentResolver).
///
/// Every variant is recoverable: callers show it to the user and let them retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("no wallet provider available")]
    ProviderUnavailable,

    #[error("request rejected by user")]
    UserRejected,

    #[error("network {chain_id} is not allowed")]
    NetworkForbidden { chain_id: u64 },

    #[error("chain {chain_id} is not registered in the wallet")]
    ChainNotRegistered { chain_id: u64 },

    #[error("network switch failed: {0}")]
    NetworkSwitchFailed(String),

    #[error("wrong network: expected {expected}, provider is on {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },

    #[error("account {0:?} is not exposed by the provider")]
    UnknownAccount(Address),

    #[error("price fetch failed: {0}")]
    PriceFetchFailed(String),

    #[error("insufficient funds for transfer")]
    InsufficientFunds,

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("a connect request is already in flight")]
    ConnectInProgress,

    #[error("a payment is already in progress")]
    PaymentInProgress,

    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl WalletError {
    /// Mapping for account and chain queries made while connecting.
    pub fn from_connect(err: ProviderError) -> Self {
        if err.is_user_rejection() {
            Self::UserRejected
        } else {
            Self::ProviderRequest(err.message)
        }
    }

    /// Mapping for `wallet_switchEthereumChain` failures.
    pub fn from_switch(err: ProviderError, chain_id: u64) -> Self {
        if err.code == ProviderError::UNRECOGNIZED_CHAIN {
            Self::ChainNotRegistered { chain_id }
        } else {
            Self::NetworkSwitchFailed(err.message)
        }
    }

    /// Mapping for transfer submission failures.
    pub fn from_transfer(err: ProviderError) -> Self {
        match err.code {
            ProviderError::USER_REJECTED => Self::UserRejected,
            ProviderError::INTERNAL_ERROR => Self::InsufficientFunds,
            _ => Self::TransferFailed(err.message),
        }
    }
}
