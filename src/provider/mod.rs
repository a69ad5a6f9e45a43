use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, TransactionRequest};
use std::fmt;
use tokio::sync::broadcast;

pub mod local;

/// Error reported by a chain provider, carrying the EIP-1193 / JSON-RPC code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Used when a failure carries no JSON-RPC code, e.g. transport errors.
    pub const UNKNOWN: i64 = -1;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected the request.")
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Push events emitted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// A `transfer`-style call on a token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub from: Address,
    pub contract: Address,
    pub data: Bytes,
}

/// How a submitted transaction ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Mined,
    Reverted,
}

/// Injected chain provider, in the shape of an EIP-1193 wallet.
///
/// Implementations report failures as [`ProviderError`] so the session and
/// payment layers can map well-known codes; they never panic on user rejection.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Prompts the user for account access.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Accounts already granted to this origin. Never prompts.
    async fn get_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    async fn get_chain_id(&self) -> Result<u64, ProviderError>;

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError>;

    /// Native currency transfer. Returns the transaction hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ProviderError>;

    /// Contract method invocation. Returns the transaction hash.
    async fn call_contract_method(&self, call: ContractCall) -> Result<H256, ProviderError>;

    /// Waits until the transaction is mined with one confirmation.
    async fn wait_for_transaction(&self, hash: H256) -> Result<TxOutcome, ProviderError>;

    /// Subscribes to `accountsChanged` / `chainChanged`. Dropping the
    /// receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}
