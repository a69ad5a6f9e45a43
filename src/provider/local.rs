/// Provider backed by a local private key and an HTTP JSON-RPC endpoint.
use crate::provider::{ChainProvider, ContractCall, ProviderError, ProviderEvent, TxOutcome};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, TransactionRequest, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

const EVENT_CAPACITY: usize = 16;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Headless [`ChainProvider`] for scripts and local dev nodes.
///
/// The only exposed account is the signer's address. An HTTP endpoint serves a
/// single chain, so `switch_chain` succeeds only when already on the target
/// and otherwise answers like a wallet that does not know the chain (4902).
/// Hosts that observe account or chain changes push them through [`events`].
///
/// # Examples
///
/// ```rust,no_run
/// use freelance_pay::provider::local::LocalSignerProvider;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LocalSignerProvider::connect(
///     "http://127.0.0.1:8545",
///     "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
/// )
/// .await?;
/// println!("signer: {:?}", provider.address());
/// # Ok(())
/// # }
/// ```
///
/// [`events`]: LocalSignerProvider::events
pub struct LocalSignerProvider {
    client: Arc<SignerClient>,
    events: broadcast::Sender<ProviderEvent>,
}

impl LocalSignerProvider {
    pub async fn connect(rpc_url: &str, private_key: &str) -> Result<Self, ProviderError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| {
            ProviderError::new(
                ProviderError::UNKNOWN,
                format!("Failed to create provider: {}", e),
            )
        })?;
        let chain_id = provider.get_chainid().await.map_err(rpc_error)?.low_u64();
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| {
                ProviderError::new(ProviderError::UNKNOWN, format!("Invalid private key: {}", e))
            })?
            .with_chain_id(chain_id);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            events,
        })
    }

    pub fn address(&self) -> Address {
        self.client.address()
    }

    /// Sender for host-observed account/chain changes.
    pub fn events(&self) -> broadcast::Sender<ProviderEvent> {
        self.events.clone()
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<H256, ProviderError> {
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(rpc_error)?;
        Ok(pending.tx_hash())
    }
}

#[async_trait]
impl ChainProvider for LocalSignerProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        Ok(vec![self.address()])
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        Ok(vec![self.address()])
    }

    async fn get_chain_id(&self) -> Result<u64, ProviderError> {
        let chain_id = self.client.get_chainid().await.map_err(rpc_error)?;
        Ok(chain_id.low_u64())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        let current = self.get_chain_id().await?;
        if current == chain_id {
            return Ok(());
        }
        Err(ProviderError::new(
            ProviderError::UNRECOGNIZED_CHAIN,
            format!("chain {} is not served by this endpoint (on {})", chain_id, current),
        ))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ProviderError> {
        self.submit(tx).await
    }

    async fn call_contract_method(&self, call: ContractCall) -> Result<H256, ProviderError> {
        let tx = TransactionRequest::new()
            .from(call.from)
            .to(call.contract)
            .data(call.data);
        self.submit(tx).await
    }

    async fn wait_for_transaction(&self, hash: H256) -> Result<TxOutcome, ProviderError> {
        loop {
            let receipt = self
                .client
                .get_transaction_receipt(hash)
                .await
                .map_err(rpc_error)?;
            match receipt {
                Some(receipt) if receipt.status == Some(U64::from(1)) => {
                    return Ok(TxOutcome::Mined);
                }
                Some(_) => return Ok(TxOutcome::Reverted),
                None => {
                    debug!(?hash, "receipt not available yet");
                    tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                }
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Keeps the JSON-RPC code of an error response, if there is one.
fn rpc_error<E: MiddlewareError>(err: E) -> ProviderError {
    match err.as_error_response() {
        Some(response) => ProviderError::new(response.code, response.message.clone()),
        None => ProviderError::new(ProviderError::UNKNOWN, err.to_string()),
    }
}
