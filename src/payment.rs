/// USD-priced token payments through the session's provider.
use crate::config::PaymentConfig;
use crate::error::WalletError;
use crate::price::{PriceCache, PriceFeed, PriceQuote};
use crate::provider::{ContractCall, TxOutcome};
use crate::session::{ProviderLease, WalletSession};
use crate::types::{PaymentPhase, PaymentTransaction, Token, TxStatus, short_address};
use ethers::abi::{self, Token as AbiToken};
use ethers::types::{Address, Bytes, H256, TransactionRequest, U256};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

const TRANSFER_SIGNATURE: &str = "transfer(address,uint256)";

/// How a `pay()` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The wallet was not connected; the call connected it and paid nothing.
    ConnectRequested { account: Address },
    Confirmed { hash: H256 },
    Failed { hash: H256, reason: String },
}

struct ResolverState {
    selected: Token,
    prices: PriceCache,
    submitting: bool,
    transaction: Option<PaymentTransaction>,
}

impl ResolverState {
    fn phase(&self) -> PaymentPhase {
        if self.submitting {
            return PaymentPhase::Submitting;
        }
        match self.transaction.as_ref().map(PaymentTransaction::status) {
            None => PaymentPhase::Idle,
            Some(TxStatus::Pending) => PaymentPhase::Pending,
            Some(TxStatus::Confirmed) => PaymentPhase::Confirmed,
            Some(TxStatus::Failed) => PaymentPhase::Failed,
        }
    }
}

/// Converts a fixed USD amount into a token quantity and pays it.
///
/// One resolver backs one payment widget. A payment attempt moves
/// `Idle -> Submitting -> Pending -> Confirmed | Failed`; a new `pay()` is
/// rejected while the previous one is submitting or pending.
///
/// # Examples
///
/// ```rust,no_run
/// use freelance_pay::config::SdkConfig;
/// use freelance_pay::payment::PaymentResolver;
/// use freelance_pay::price::HttpPriceFeed;
/// use freelance_pay::session::{NetworkPolicy, WalletSession};
/// use freelance_pay::store::MemoryStore;
/// use rust_decimal::Decimal;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SdkConfig::default();
/// let session = Arc::new(WalletSession::new(
///     None,
///     Arc::new(MemoryStore::new()),
///     NetworkPolicy::from_config(&config.session),
/// ));
/// let resolver = PaymentResolver::new(
///     session,
///     Arc::new(HttpPriceFeed::new(&config.payment.price_feed_url)),
///     config.payment.clone(),
///     config.tokens.clone(),
///     Decimal::from(100),
/// )?;
/// resolver.refresh_catalogue().await?;
/// println!("{} {}", resolver.derived_token_amount(), resolver.selected_token().symbol);
/// # Ok(())
/// # }
/// ```
pub struct PaymentResolver {
    session: Arc<WalletSession>,
    feed: Arc<dyn PriceFeed>,
    settings: PaymentConfig,
    catalogue: Vec<Token>,
    usd_amount: Decimal,
    state: Arc<Mutex<ResolverState>>,
}

impl PaymentResolver {
    /// The first catalogue entry starts out selected.
    pub fn new(
        session: Arc<WalletSession>,
        feed: Arc<dyn PriceFeed>,
        settings: PaymentConfig,
        catalogue: Vec<Token>,
        usd_amount: Decimal,
    ) -> Result<Self, WalletError> {
        if usd_amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount(format!(
                "usd amount must be positive, got {}",
                usd_amount
            )));
        }
        let selected = catalogue
            .first()
            .cloned()
            .ok_or_else(|| WalletError::InvalidAmount("token catalogue is empty".to_string()))?;
        Ok(Self {
            session,
            feed,
            settings,
            catalogue,
            usd_amount,
            state: Arc::new(Mutex::new(ResolverState {
                selected,
                prices: PriceCache::new(),
                submitting: false,
                transaction: None,
            })),
        })
    }

    pub fn catalogue(&self) -> &[Token] {
        &self.catalogue
    }

    pub fn usd_amount(&self) -> Decimal {
        self.usd_amount
    }

    pub fn selected_token(&self) -> Token {
        self.lock().selected.clone()
    }

    pub fn select_token(&self, token: Token) {
        if !self.catalogue.contains(&token) {
            debug!(token = %token.key(), "selecting a token outside the catalogue");
        }
        self.lock().selected = token;
    }

    pub fn quote(&self) -> PriceQuote {
        let state = self.lock();
        state
            .prices
            .quote(&state.selected.key(), self.settings.price_ttl(), Instant::now())
    }

    /// `usd_amount / price` at display precision, zero while the price is unknown.
    pub fn derived_token_amount(&self) -> Decimal {
        derive_token_amount(
            self.usd_amount,
            self.quote().usd(),
            self.settings.display_precision,
        )
    }

    pub fn phase(&self) -> PaymentPhase {
        self.lock().phase()
    }

    pub fn transaction(&self) -> Option<PaymentTransaction> {
        self.lock().transaction.clone()
    }

    /// Fetches prices for `tokens` in one batch. On failure the cache is left
    /// as it was. Returns how many cached prices were updated.
    pub async fn refresh_prices(&self, tokens: &[Token]) -> Result<usize, WalletError> {
        let mut feed_ids: Vec<String> = tokens.iter().map(|t| t.price_feed_id.clone()).collect();
        feed_ids.sort();
        feed_ids.dedup();
        let prices = self.feed.fetch_usd_prices(&feed_ids).await.map_err(|e| {
            warn!(error = %e, "price refresh failed, keeping cached prices");
            WalletError::PriceFetchFailed(e.to_string())
        })?;
        let updated = self.lock().prices.apply(tokens, &prices, Instant::now());
        debug!(updated, requested = feed_ids.len(), "prices refreshed");
        Ok(updated)
    }

    pub async fn refresh_catalogue(&self) -> Result<usize, WalletError> {
        self.refresh_prices(&self.catalogue).await
    }

    /// Pays the derived amount of the selected token to `recipient`.
    ///
    /// Without a connected account this connects instead and returns
    /// [`PaymentOutcome::ConnectRequested`]. `on_complete` runs once, only when
    /// the transfer is confirmed. The confirmation wait keeps running if the
    /// returned future is dropped.
    pub async fn pay<F>(&self, recipient: Address, on_complete: F) -> Result<PaymentOutcome, WalletError>
    where
        F: FnOnce(&Token, H256) + Send + 'static,
    {
        let Some(from) = self.session.active_account() else {
            info!("wallet not connected, connecting instead of paying");
            let account = self.session.connect().await?;
            return Ok(PaymentOutcome::ConnectRequested { account });
        };
        let attempt = SubmitGuard::begin(&self.state)?;
        let token = self.selected_token();
        let amount = self.derived_token_amount();

        let lease = self.session.lease().await?;
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(format!(
                "no price available for {}",
                token.key()
            )));
        }
        self.ensure_network(&lease, token.chain_id).await?;

        let units = to_smallest_units(amount, token.decimals)?;
        info!(
            token = %token.key(),
            %amount,
            %units,
            from = %short_address(&from),
            to = %short_address(&recipient),
            "submitting payment"
        );
        let submitted = match token.contract_address {
            Some(contract) => {
                lease
                    .provider()
                    .call_contract_method(ContractCall {
                        from,
                        contract,
                        data: encode_transfer(recipient, units),
                    })
                    .await
            }
            None => {
                let tx = TransactionRequest::new()
                    .from(from)
                    .to(recipient)
                    .value(units);
                lease.provider().send_transaction(tx).await
            }
        };
        let hash = submitted
            .map_err(WalletError::from_transfer)
            .inspect_err(|e| warn!(error = %e, "payment submission failed"))?;
        let provider = lease.provider_arc();
        drop(lease);
        attempt.commit(hash);
        match token.network().tx_link(&hash) {
            Some(link) => info!(?hash, %link, "payment pending"),
            None => info!(?hash, "payment pending"),
        }

        let state = Arc::clone(&self.state);
        let timeout = self.settings.confirmation_timeout();
        let confirmation = tokio::spawn(async move {
            let waited = tokio::time::timeout(timeout, provider.wait_for_transaction(hash)).await;
            let failure = match waited {
                Ok(Ok(TxOutcome::Mined)) => None,
                Ok(Ok(TxOutcome::Reverted)) => Some("transaction reverted".to_string()),
                Ok(Err(err)) => Some(err.message),
                Err(_) => Some("timed out waiting for confirmation".to_string()),
            };
            match failure {
                None => {
                    settle(&state, hash, TxStatus::Confirmed);
                    info!(?hash, "payment confirmed");
                    on_complete(&token, hash);
                    PaymentOutcome::Confirmed { hash }
                }
                Some(reason) => {
                    settle(&state, hash, TxStatus::Failed);
                    warn!(?hash, %reason, "payment failed");
                    PaymentOutcome::Failed { hash, reason }
                }
            }
        });
        confirmation
            .await
            .map_err(|e| WalletError::TransferFailed(format!("confirmation task failed: {}", e)))
    }

    /// One switch request and one re-check after the configured delay.
    /// Tokens on a denied network are refused even when the provider is
    /// already there.
    async fn ensure_network(
        &self,
        lease: &ProviderLease<'_>,
        expected: u64,
    ) -> Result<(), WalletError> {
        if self.session.policy().is_denied(expected) {
            warn!(chain_id = expected, "refusing to pay on a forbidden network");
            return Err(WalletError::NetworkForbidden { chain_id: expected });
        }
        let current = lease
            .provider()
            .get_chain_id()
            .await
            .map_err(WalletError::from_connect)?;
        if current == expected {
            return Ok(());
        }
        lease.switch_network(expected).await?;
        tokio::time::sleep(self.settings.network_switch_delay()).await;
        let actual = tokio::time::timeout(
            self.settings.network_check_timeout(),
            lease.provider().get_chain_id(),
        )
        .await
        .map_err(|_| WalletError::NetworkMismatch {
            expected,
            actual: current,
        })?
        .map_err(WalletError::from_connect)?;
        if actual != expected {
            warn!(expected, actual, "provider still on the wrong network");
            return Err(WalletError::NetworkMismatch { expected, actual });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ResolverState>) -> MutexGuard<'_, ResolverState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn settle(state: &Mutex<ResolverState>, hash: H256, status: TxStatus) {
    let mut state = lock_state(state);
    if let Some(tx) = state.transaction.as_mut().filter(|tx| tx.hash == hash) {
        tx.settle(status);
    }
}

/// Marks the resolver as submitting until dropped.
struct SubmitGuard<'a> {
    state: &'a Mutex<ResolverState>,
}

impl<'a> SubmitGuard<'a> {
    fn begin(state: &'a Mutex<ResolverState>) -> Result<Self, WalletError> {
        let mut guarded = lock_state(state);
        if guarded.phase().is_busy() {
            return Err(WalletError::PaymentInProgress);
        }
        guarded.submitting = true;
        Ok(Self { state })
    }

    /// Records the submitted transaction and ends the submitting phase.
    fn commit(self, hash: H256) {
        let mut state = lock_state(self.state);
        state.submitting = false;
        state.transaction = Some(PaymentTransaction::pending(hash));
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).submitting = false;
    }
}

pub fn derive_token_amount(usd_amount: Decimal, unit_price: Option<Decimal>, precision: u32) -> Decimal {
    let Some(price) = unit_price.filter(|p| !p.is_zero()) else {
        return Decimal::ZERO;
    };
    match usd_amount.checked_div(price) {
        Some(quantity) => {
            let mut rounded =
                quantity.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
            rounded.rescale(precision);
            rounded
        }
        None => Decimal::ZERO,
    }
}

/// `amount * 10^decimals`, truncated. Scaled in `U256`, so any amount a
/// `Decimal` can hold fits as long as the result fits 256 bits.
pub fn to_smallest_units(amount: Decimal, decimals: u8) -> Result<U256, WalletError> {
    let overflow = || WalletError::InvalidAmount(format!("{} does not fit {} decimals", amount, decimals));
    if amount.is_sign_negative() {
        return Err(WalletError::InvalidAmount(format!("negative amount {}", amount)));
    }
    let truncated = amount.round_dp_with_strategy(u32::from(decimals), RoundingStrategy::ToZero);
    let mantissa = u128::try_from(truncated.mantissa()).map_err(|_| overflow())?;
    let shift = u32::from(decimals).saturating_sub(truncated.scale());
    let factor = (0..shift)
        .try_fold(U256::one(), |acc, _| acc.checked_mul(U256::from(10u8)))
        .ok_or_else(overflow)?;
    U256::from(mantissa).checked_mul(factor).ok_or_else(overflow)
}

/// Calldata for `transfer(address,uint256)`.
pub fn encode_transfer(to: Address, units: U256) -> Bytes {
    let mut data = ethers::utils::id(TRANSFER_SIGNATURE).to_vec();
    data.extend(abi::encode(&[AbiToken::Address(to), AbiToken::Uint(units)]));
    Bytes::from(data)
}
