//! Wallet session and USD-priced token payments for the freelancing job board.
//!
//! - [`session::WalletSession`] tracks the connected account and network of an
//!   injected chain provider and enforces the network denylist.
//! - [`payment::PaymentResolver`] turns a USD amount into a token quantity at
//!   the current price and pays it through the session's provider.
//!
//! Providers, price feeds and persistence are traits so hosts can plug in a
//! browser wallet bridge, an RPC signer or test doubles.

pub mod config;
pub mod error;
pub mod payment;
pub mod price;
pub mod provider;
pub mod session;
pub mod store;
pub mod types;

pub use config::{ConfigBuilder, ConfigManager, SdkConfig};
pub use error::WalletError;
pub use payment::{PaymentOutcome, PaymentResolver};
pub use price::{HttpPriceFeed, PriceFeed, PriceQuote};
pub use provider::{ChainProvider, ProviderError, ProviderEvent};
pub use session::{NetworkPolicy, SessionEvent, WalletSession};
pub use store::{FileStore, MemoryStore, SessionStore};
pub use types::{Network, PaymentPhase, Token, TxStatus};
