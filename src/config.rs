/// Configuration for sessions, payments and the token catalogue.
use crate::types::{SEPOLIA_USDC, Token, TokenKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PRICE_FEED_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default = "default_tokens")]
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Networks the session refuses to operate on.
    pub denied_chain_ids: Vec<u64>,
    /// Local/private networks that get their own notification.
    pub local_chain_ids: Vec<u64>,
    /// JSON file for the persisted session. In-memory when unset.
    pub store_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            denied_chain_ids: vec![1],
            local_chain_ids: vec![1337, 31337],
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub price_feed_url: String,
    pub display_precision: u32,
    pub network_switch_delay_ms: u64,
    pub network_check_timeout_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub price_ttl_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            price_feed_url: DEFAULT_PRICE_FEED_URL.to_string(),
            display_precision: 6,
            network_switch_delay_ms: 1000,
            network_check_timeout_ms: 5000,
            confirmation_timeout_secs: 120,
            price_ttl_secs: 60,
        }
    }
}

impl PaymentConfig {
    pub fn network_switch_delay(&self) -> Duration {
        Duration::from_millis(self.network_switch_delay_ms)
    }

    pub fn network_check_timeout(&self) -> Duration {
        Duration::from_millis(self.network_check_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
}

fn default_tokens() -> Vec<Token> {
    vec![
        Token::native("ETH", 11155111, 18, "ethereum"),
        Token::contract("USDC", 11155111, 6, SEPOLIA_USDC, "usd-coin"),
        Token::native("BNB", 97, 18, "binancecoin"),
        Token::native("POL", 80002, 18, "polygon-ecosystem-token"),
    ]
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            payment: PaymentConfig::default(),
            tokens: default_tokens(),
        }
    }
}

impl SdkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let denied: HashSet<u64> = self.session.denied_chain_ids.iter().copied().collect();
        if let Some(id) = self
            .session
            .local_chain_ids
            .iter()
            .find(|id| denied.contains(id))
        {
            return Err(ConfigError::InvalidConfig(format!(
                "chain {} is both denied and local",
                id
            )));
        }
        url::Url::parse(&self.payment.price_feed_url).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "price feed url {:?}: {}",
                self.payment.price_feed_url, e
            ))
        })?;
        if self.payment.display_precision == 0 {
            return Err(ConfigError::InvalidConfig(
                "display precision must be positive".to_string(),
            ));
        }
        let mut keys: HashSet<TokenKey> = HashSet::new();
        for token in &self.tokens {
            if denied.contains(&token.chain_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "token {} is on a denied network",
                    token.key()
                )));
            }
            if !keys.insert(token.key()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate token {}",
                    token.key()
                )));
            }
        }
        Ok(())
    }

    pub fn token(&self, symbol: &str, chain_id: u64) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol) && t.chain_id == chain_id)
    }
}

pub struct ConfigManager {
    config: SdkConfig,
    environment: HashMap<String, String>,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_environment(SdkConfig::default(), Self::load_environment_variables())
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: SdkConfig = serde_json::from_str(&content)?;
        Self::with_environment(config, Self::load_environment_variables())
    }

    pub fn from_config(config: SdkConfig) -> Result<Self, ConfigError> {
        Self::with_environment(config, Self::load_environment_variables())
    }

    /// Applies `FREELANCE_*` overrides from `environment` and validates.
    pub fn with_environment(
        mut config: SdkConfig,
        environment: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = environment.get("FREELANCE_PRICE_FEED_URL") {
            config.payment.price_feed_url = url.clone();
        }
        if let Some(path) = environment.get("FREELANCE_STORE_PATH") {
            config.session.store_path = Some(PathBuf::from(path));
        }
        if let Some(value) = environment.get("FREELANCE_CONFIRMATION_TIMEOUT_SECS") {
            config.payment.confirmation_timeout_secs = parse_env(
                "FREELANCE_CONFIRMATION_TIMEOUT_SECS",
                value,
            )?;
        }
        if let Some(value) = environment.get("FREELANCE_NETWORK_SWITCH_DELAY_MS") {
            config.payment.network_switch_delay_ms =
                parse_env("FREELANCE_NETWORK_SWITCH_DELAY_MS", value)?;
        }
        config.validate()?;
        Ok(Self {
            config,
            environment,
        })
    }

    pub fn get_config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn into_config(self) -> SdkConfig {
        self.config
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    fn load_environment_variables() -> HashMap<String, String> {
        std::env::vars()
            .filter(|(key, _)| key.starts_with("FREELANCE_"))
            .collect()
    }
}

fn parse_env(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidConfig(format!("{} must be an integer, got {:?}", key, value)))
}

pub struct ConfigBuilder {
    config: SdkConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SdkConfig::default(),
        }
    }

    pub fn with_denied_chains(mut self, chain_ids: Vec<u64>) -> Self {
        self.config.session.denied_chain_ids = chain_ids;
        self
    }

    pub fn with_local_chains(mut self, chain_ids: Vec<u64>) -> Self {
        self.config.session.local_chain_ids = chain_ids;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session.store_path = Some(path.into());
        self
    }

    pub fn with_price_feed_url(mut self, url: &str) -> Self {
        self.config.payment.price_feed_url = url.to_string();
        self
    }

    pub fn with_display_precision(mut self, precision: u32) -> Self {
        self.config.payment.display_precision = precision;
        self
    }

    pub fn with_network_switch_delay(mut self, delay: Duration) -> Self {
        self.config.payment.network_switch_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.config.payment.confirmation_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<Token>) -> Self {
        self.config.tokens = tokens;
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.config.tokens.push(token);
        self
    }

    pub fn build(self) -> Result<SdkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
