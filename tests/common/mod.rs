#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, H256, TransactionRequest};
use freelance_pay::price::{PriceFeed, PriceFeedError};
use freelance_pay::provider::{ChainProvider, ContractCall, ProviderError, ProviderEvent, TxOutcome};
use freelance_pay::store::{MemoryStore, PersistedSession};
use freelance_pay::{NetworkPolicy, WalletSession};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};

pub const SEPOLIA: u64 = 11155111;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

#[derive(Default)]
pub struct MockState {
    /// Accounts handed out by `request_accounts`.
    pub accounts: Vec<Address>,
    /// Whether `get_accounts` already sees the accounts without a prompt.
    pub granted: bool,
    pub chain_id: u64,
    pub request_accounts_calls: usize,
    pub switch_calls: Vec<u64>,
    pub sent: Vec<TransactionRequest>,
    pub contract_calls: Vec<ContractCall>,
    pub request_error: Option<ProviderError>,
    pub switch_error: Option<ProviderError>,
    pub submit_error: Option<ProviderError>,
    /// When false, a successful `switch_chain` leaves the chain unchanged.
    pub switch_applies: bool,
    pub outcome: Option<TxOutcome>,
    pub next_hash: u64,
}

/// Scripted in-memory wallet.
pub struct MockProvider {
    pub state: Mutex<MockState>,
    events: broadcast::Sender<ProviderEvent>,
    /// Blocks `request_accounts` until notified.
    pub request_gate: Mutex<Option<Arc<Notify>>>,
    /// Blocks `wait_for_transaction` until notified.
    pub wait_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockProvider {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(MockState {
                accounts,
                chain_id,
                switch_applies: true,
                outcome: Some(TxOutcome::Mined),
                ..MockState::default()
            }),
            events,
            request_gate: Mutex::new(None),
            wait_gate: Mutex::new(None),
        })
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    pub fn gate_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.request_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_confirmations(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.wait_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn submissions(&self) -> usize {
        let state = self.state();
        state.sent.len() + state.contract_calls.len()
    }

    fn next_hash(&self) -> H256 {
        let mut state = self.state();
        state.next_hash += 1;
        H256::from_low_u64_be(state.next_hash)
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.state().request_accounts_calls += 1;
        let gate = self.request_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state();
        if let Some(err) = state.request_error.clone() {
            return Err(err);
        }
        state.granted = true;
        Ok(state.accounts.clone())
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let state = self.state();
        Ok(if state.granted {
            state.accounts.clone()
        } else {
            Vec::new()
        })
    }

    async fn get_chain_id(&self) -> Result<u64, ProviderError> {
        Ok(self.state().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        let applied = {
            let mut state = self.state();
            state.switch_calls.push(chain_id);
            if let Some(err) = state.switch_error.clone() {
                return Err(err);
            }
            if state.switch_applies {
                state.chain_id = chain_id;
            }
            state.switch_applies
        };
        if applied {
            self.emit(ProviderEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, ProviderError> {
        if let Some(err) = self.state().submit_error.clone() {
            return Err(err);
        }
        self.state().sent.push(tx);
        Ok(self.next_hash())
    }

    async fn call_contract_method(&self, call: ContractCall) -> Result<H256, ProviderError> {
        if let Some(err) = self.state().submit_error.clone() {
            return Err(err);
        }
        self.state().contract_calls.push(call);
        Ok(self.next_hash())
    }

    async fn wait_for_transaction(&self, _hash: H256) -> Result<TxOutcome, ProviderError> {
        let gate = self.wait_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let outcome = self.state().outcome;
        match outcome {
            Some(outcome) => Ok(outcome),
            // never mined
            None => std::future::pending().await,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Feed answering from a fixed table, or failing when `fail` is set.
#[derive(Default)]
pub struct StaticFeed {
    pub prices: Mutex<HashMap<String, Decimal>>,
    pub fail: Mutex<bool>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl StaticFeed {
    pub fn with_prices(prices: &[(&str, &str)]) -> Arc<Self> {
        let feed = Self::default();
        *feed.prices.lock().unwrap() = prices
            .iter()
            .map(|(id, usd)| (id.to_string(), usd.parse().unwrap()))
            .collect();
        Arc::new(feed)
    }
}

#[async_trait]
impl PriceFeed for StaticFeed {
    async fn fetch_usd_prices(
        &self,
        feed_ids: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceFeedError> {
        self.calls.lock().unwrap().push(feed_ids.to_vec());
        if *self.fail.lock().unwrap() {
            return Err(PriceFeedError::Status(503));
        }
        let prices = self.prices.lock().unwrap();
        Ok(feed_ids
            .iter()
            .filter_map(|id| prices.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

pub fn session_with(
    provider: &Arc<MockProvider>,
    persisted: PersistedSession,
) -> (Arc<WalletSession>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_session(persisted));
    let session = Arc::new(WalletSession::new(
        Some(Arc::clone(provider) as Arc<dyn ChainProvider>),
        Arc::clone(&store) as Arc<dyn freelance_pay::SessionStore>,
        NetworkPolicy::default(),
    ));
    (session, store)
}
