/// Wallet session: which account, on which network, and the network policy.
use crate::config::SessionConfig;
use crate::error::WalletError;
use crate::provider::{ChainProvider, ProviderEvent};
use crate::store::{PersistedSession, SessionStore};
use crate::types::{Network, short_address};
use ethers::types::Address;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 32;

/// Which networks the session refuses, and which count as local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicy {
    denied: HashSet<u64>,
    local: HashSet<u64>,
}

impl NetworkPolicy {
    pub fn new(denied: impl IntoIterator<Item = u64>, local: impl IntoIterator<Item = u64>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
            local: local.into_iter().collect(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.denied_chain_ids.iter().copied(),
            config.local_chain_ids.iter().copied(),
        )
    }

    pub fn is_denied(&self, chain_id: u64) -> bool {
        self.denied.contains(&chain_id)
    }

    pub fn is_local(&self, chain_id: u64) -> bool {
        self.local.contains(&chain_id)
    }
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Local,
    Other,
}

/// Notifications for UI listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { account: Address, chain_id: u64 },
    Disconnected,
    AccountChanged { previous: Option<Address>, current: Address },
    NetworkChanged { chain_id: u64, kind: NetworkKind },
    NetworkRejected { chain_id: u64 },
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub active_account: Option<Address>,
    pub known_accounts: Vec<Address>,
    pub active_network_id: Option<u64>,
    pub connecting: bool,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.active_account.is_some()
    }
}

/// Single source of truth for the wallet connection.
///
/// Construct once, share behind an `Arc`, and feed it provider events with
/// [`WalletSession::listen`]. `active_account` is always `None` or one of
/// `known_accounts`.
pub struct WalletSession {
    provider: Option<Arc<dyn ChainProvider>>,
    store: Arc<dyn SessionStore>,
    policy: NetworkPolicy,
    state: RwLock<SessionSnapshot>,
    provider_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl WalletSession {
    pub fn new(
        provider: Option<Arc<dyn ChainProvider>>,
        store: Arc<dyn SessionStore>,
        policy: NetworkPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            store,
            policy,
            state: RwLock::new(SessionSnapshot::default()),
            provider_lock: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().clone()
    }

    pub fn active_account(&self) -> Option<Address> {
        self.read().active_account
    }

    pub fn known_accounts(&self) -> Vec<Address> {
        self.read().known_accounts.clone()
    }

    pub fn active_network_id(&self) -> Option<u64> {
        self.read().active_network_id
    }

    pub fn is_connecting(&self) -> bool {
        self.read().connecting
    }

    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    /// Asks the provider for account access and adopts the result.
    ///
    /// Overlapping calls are rejected with [`WalletError::ConnectInProgress`]
    /// instead of issuing a second account request.
    pub async fn connect(&self) -> Result<Address, WalletError> {
        let provider = self.provider()?;
        let _guard = ConnectGuard::acquire(self)?;
        info!("requesting wallet accounts");
        let accounts = provider
            .request_accounts()
            .await
            .map_err(WalletError::from_connect)
            .inspect_err(|e| warn!(error = %e, "connect failed"))?;
        if accounts.is_empty() {
            return Err(WalletError::ProviderRequest(
                "provider returned no accounts".to_string(),
            ));
        }
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(WalletError::from_connect)?;
        self.adopt(accounts, chain_id)
    }

    /// Clears the in-memory state and the persisted entries. Idempotent.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut state = self.write();
            let was_connected = state.active_account.is_some();
            state.active_account = None;
            state.known_accounts.clear();
            state.active_network_id = None;
            was_connected
        };
        self.clear_persisted();
        if was_connected {
            info!("wallet disconnected");
            self.emit(SessionEvent::Disconnected);
        }
    }

    /// Asks the provider to move to `chain_id`.
    ///
    /// `active_network_id` only changes once the provider reports
    /// `chainChanged`, so callers must not expect it to be updated on return.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        self.lease().await?.switch_network(chain_id).await
    }

    pub fn switch_account(&self, candidate: Address) -> Result<(), WalletError> {
        let previous = {
            let mut state = self.write();
            if !state.known_accounts.contains(&candidate) {
                return Err(WalletError::UnknownAccount(candidate));
            }
            state.active_account.replace(candidate)
        };
        self.persist(candidate);
        if previous != Some(candidate) {
            info!(account = %short_address(&candidate), "account switched");
            self.emit(SessionEvent::AccountChanged {
                previous,
                current: candidate,
            });
        }
        Ok(())
    }

    /// Reaction to the provider's `accountsChanged`.
    pub fn handle_accounts_changed(&self, accounts: Vec<Address>) {
        if accounts.is_empty() {
            debug!("provider revoked all accounts");
            self.disconnect();
            return;
        }
        if let Some(chain_id) = self.active_network_id().filter(|id| self.policy.is_denied(*id)) {
            warn!(chain_id, "ignoring account change on a forbidden network");
            self.write().known_accounts.clear();
            self.clear_persisted();
            return;
        }
        let resolved = self.resolve_account(&accounts);
        let previous = {
            let mut state = self.write();
            state.known_accounts = accounts;
            state.active_account.replace(resolved)
        };
        self.persist(resolved);
        if previous != Some(resolved) {
            info!(account = %short_address(&resolved), "active account changed");
            self.emit(SessionEvent::AccountChanged {
                previous,
                current: resolved,
            });
        }
    }

    /// Reaction to the provider's `chainChanged`.
    pub fn handle_chain_changed(&self, chain_id: u64) {
        let network = Network::from_chain_id(chain_id);
        if self.policy.is_denied(chain_id) {
            warn!(%network, "switched to a forbidden network, disconnecting");
            self.disconnect();
            self.write().active_network_id = Some(chain_id);
            self.emit(SessionEvent::NetworkRejected { chain_id });
            return;
        }
        self.write().active_network_id = Some(chain_id);
        let kind = if self.policy.is_local(chain_id) {
            info!(%network, "connected to a local network");
            NetworkKind::Local
        } else {
            info!(%network, "network changed");
            NetworkKind::Other
        };
        self.emit(SessionEvent::NetworkChanged { chain_id, kind });
    }

    /// Restores the previous connection at startup without prompting when the
    /// provider still grants accounts. Falls back to one `connect()` when only
    /// the persisted flag says we were connected.
    pub async fn reconcile(&self) -> Result<Option<Address>, WalletError> {
        let Some(provider) = self.provider.clone() else {
            debug!("no provider present, skipping reconciliation");
            return Ok(None);
        };
        let accounts = provider
            .get_accounts()
            .await
            .map_err(WalletError::from_connect)?;
        if !accounts.is_empty() {
            let chain_id = provider
                .get_chain_id()
                .await
                .map_err(WalletError::from_connect)?;
            return self.adopt(accounts, chain_id).map(Some);
        }
        if !self.load_persisted().connected {
            return Ok(None);
        }
        info!("restoring previous wallet connection");
        match self.connect().await {
            Ok(account) => Ok(Some(account)),
            Err(err) => {
                warn!(error = %err, "could not restore wallet connection");
                self.clear_persisted();
                Err(err)
            }
        }
    }

    /// Spawns a task feeding provider events into this session. The task stops
    /// when the returned listener is stopped or dropped.
    pub fn listen(self: &Arc<Self>) -> Result<EventListener, WalletError> {
        let mut rx = self.provider()?.subscribe();
        let session = Arc::clone(self);
        let id = Uuid::new_v4();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ProviderEvent::AccountsChanged(accounts)) => {
                        session.handle_accounts_changed(accounts)
                    }
                    Ok(ProviderEvent::ChainChanged(chain_id)) => {
                        session.handle_chain_changed(chain_id)
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%id, skipped, "provider events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%id, "provider event stream closed");
        });
        debug!(%id, "listening for provider events");
        Ok(EventListener { task })
    }

    /// Exclusive handle on the provider for calls that change its state.
    pub async fn lease(&self) -> Result<ProviderLease<'_>, WalletError> {
        let provider = self.provider()?;
        let guard = self.provider_lock.lock().await;
        Ok(ProviderLease {
            _guard: guard,
            provider,
            policy: &self.policy,
        })
    }

    fn provider(&self) -> Result<Arc<dyn ChainProvider>, WalletError> {
        self.provider.clone().ok_or(WalletError::ProviderUnavailable)
    }

    /// Shared tail of `connect()` and `reconcile()`.
    fn adopt(&self, accounts: Vec<Address>, chain_id: u64) -> Result<Address, WalletError> {
        if self.policy.is_denied(chain_id) {
            warn!(network = %Network::from_chain_id(chain_id), "refusing to connect on a forbidden network");
            {
                let mut state = self.write();
                state.active_account = None;
                state.known_accounts.clear();
                state.active_network_id = Some(chain_id);
            }
            self.clear_persisted();
            self.emit(SessionEvent::NetworkRejected { chain_id });
            return Err(WalletError::NetworkForbidden { chain_id });
        }
        let account = self.resolve_account(&accounts);
        {
            let mut state = self.write();
            state.known_accounts = accounts;
            state.active_account = Some(account);
            state.active_network_id = Some(chain_id);
        }
        self.persist(account);
        info!(
            account = %short_address(&account),
            network = %Network::from_chain_id(chain_id),
            "wallet connected"
        );
        self.emit(SessionEvent::Connected { account, chain_id });
        Ok(account)
    }

    /// Persisted selection if the provider still exposes it, else the first account.
    fn resolve_account(&self, accounts: &[Address]) -> Address {
        self.load_persisted()
            .selected_account
            .filter(|selected| accounts.contains(selected))
            .unwrap_or(accounts[0])
    }

    fn load_persisted(&self) -> PersistedSession {
        self.store.load().unwrap_or_else(|err| {
            warn!(error = %err, "failed to read persisted session");
            PersistedSession::default()
        })
    }

    fn persist(&self, account: Address) {
        let session = PersistedSession {
            connected: true,
            selected_account: Some(account),
        };
        if let Err(err) = self.store.save(&session) {
            warn!(error = %err, "failed to persist session");
        }
    }

    fn clear_persisted(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear persisted session");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no listeners is fine
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionSnapshot> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionSnapshot> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sets `connecting` for the lifetime of one connect call, including early
/// returns and cancellation.
struct ConnectGuard<'a> {
    session: &'a WalletSession,
}

impl<'a> ConnectGuard<'a> {
    fn acquire(session: &'a WalletSession) -> Result<Self, WalletError> {
        let mut state = session.write();
        if state.connecting {
            debug!("connect already in flight");
            return Err(WalletError::ConnectInProgress);
        }
        state.connecting = true;
        Ok(Self { session })
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.session.write().connecting = false;
    }
}

/// Provider access serialized through the owning session.
pub struct ProviderLease<'a> {
    _guard: MutexGuard<'a, ()>,
    provider: Arc<dyn ChainProvider>,
    policy: &'a NetworkPolicy,
}

impl ProviderLease<'_> {
    pub fn provider(&self) -> &dyn ChainProvider {
        self.provider.as_ref()
    }

    pub fn provider_arc(&self) -> Arc<dyn ChainProvider> {
        Arc::clone(&self.provider)
    }

    /// Denied targets fail before the provider is contacted.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        if self.policy.is_denied(chain_id) {
            warn!(chain_id, "refusing to switch to a forbidden network");
            return Err(WalletError::NetworkForbidden { chain_id });
        }
        info!(network = %Network::from_chain_id(chain_id), "requesting network switch");
        self.provider
            .switch_chain(chain_id)
            .await
            .map_err(|e| WalletError::from_switch(e, chain_id))
            .inspect_err(|e| warn!(error = %e, "network switch failed"))
    }
}

/// Handle on the provider event subscription started by [`WalletSession::listen`].
pub struct EventListener {
    task: JoinHandle<()>,
}

impl EventListener {
    /// Stops applying provider events.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_denies_only_mainnet() {
        let policy = NetworkPolicy::default();
        assert!(policy.is_denied(1));
        for id in [56, 137, 11155111, 31337] {
            assert!(!policy.is_denied(id));
        }
        assert!(policy.is_local(1337));
        assert!(policy.is_local(31337));
        assert!(!policy.is_local(11155111));
    }

    #[test]
    fn test_snapshot_connected() {
        let snapshot = SessionSnapshot {
            active_account: Some(Address::from_low_u64_be(1)),
            known_accounts: vec![Address::from_low_u64_be(1)],
            active_network_id: Some(11155111),
            connecting: false,
        };
        assert!(snapshot.is_connected());
        assert!(!SessionSnapshot::default().is_connected());
    }
}
