/// USD price lookups and the per-widget price cache.
use crate::types::{Token, TokenKey};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("price request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price feed answered with status {0}")]
    Status(u16),

    #[error("invalid price response: {0}")]
    Decode(String),
}

/// Batched unit price source, keyed by each token's `price_feed_id`.
///
/// Ids the feed does not know are left out of the result.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_usd_prices(
        &self,
        feed_ids: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceFeedError>;
}

/// CoinGecko-compatible `simple/price` endpoint.
pub struct HttpPriceFeed {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }

    fn request_url(&self, feed_ids: &[String]) -> Result<url::Url, PriceFeedError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| PriceFeedError::Decode(format!("bad base url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("ids", &feed_ids.join(","))
            .append_pair("vs_currencies", "usd");
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

/// Decodes `{"<feed id>": {"usd": <number>}, ...}`.
pub fn parse_price_body(body: &str) -> Result<HashMap<String, Decimal>, PriceFeedError> {
    let quotes: HashMap<String, UsdQuote> =
        serde_json::from_str(body).map_err(|e| PriceFeedError::Decode(e.to_string()))?;
    let mut prices = HashMap::new();
    for (id, quote) in quotes {
        let Some(usd) = quote.usd else {
            continue;
        };
        match Decimal::try_from(usd) {
            Ok(price) => {
                prices.insert(id, price);
            }
            Err(_) => warn!(feed_id = %id, usd, "unrepresentable price"),
        }
    }
    Ok(prices)
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch_usd_prices(
        &self,
        feed_ids: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceFeedError> {
        if feed_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.request_url(feed_ids)?;
        debug!(%url, "fetching prices");
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(PriceFeedError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        parse_price_body(&body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPrice {
    pub usd: Decimal,
    pub fetched_at: Instant,
}

/// What the cache knows about a token's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceQuote {
    Missing,
    Fresh(Decimal),
    Stale { usd: Decimal, age: Duration },
}

impl PriceQuote {
    pub fn usd(&self) -> Option<Decimal> {
        match self {
            PriceQuote::Missing => None,
            PriceQuote::Fresh(usd) | PriceQuote::Stale { usd, .. } => Some(*usd),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PriceCache {
    entries: HashMap<TokenKey, CachedPrice>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores prices for every token whose feed id is in `prices`.
    /// Other entries are kept as they were. Returns how many were updated.
    pub fn apply(
        &mut self,
        tokens: &[Token],
        prices: &HashMap<String, Decimal>,
        now: Instant,
    ) -> usize {
        let mut updated = 0;
        for token in tokens {
            let Some(usd) = prices.get(&token.price_feed_id) else {
                continue;
            };
            if usd.is_sign_negative() || usd.is_zero() {
                warn!(token = %token.key(), %usd, "ignoring non-positive price");
                continue;
            }
            self.entries.insert(
                token.key(),
                CachedPrice {
                    usd: *usd,
                    fetched_at: now,
                },
            );
            updated += 1;
        }
        updated
    }

    pub fn get(&self, key: &TokenKey) -> Option<&CachedPrice> {
        self.entries.get(key)
    }

    pub fn quote(&self, key: &TokenKey, ttl: Duration, now: Instant) -> PriceQuote {
        match self.entries.get(key) {
            None => PriceQuote::Missing,
            Some(entry) => {
                let age = now.saturating_duration_since(entry.fetched_at);
                if age > ttl {
                    PriceQuote::Stale {
                        usd: entry.usd,
                        age,
                    }
                } else {
                    PriceQuote::Fresh(entry.usd)
                }
            }
        }
    }
}
