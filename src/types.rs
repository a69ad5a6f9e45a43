/// Networks, tokens and payment transaction states.
use ethers::types::{Address, H160, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sepolia USDC (Circle test deployment).
pub const SEPOLIA_USDC: Address = H160([
    0x1c, 0x7d, 0x4b, 0x19, 0x6c, 0xb0, 0xc7, 0xb0, 0x1d, 0x74, 0x3f, 0xbc, 0x61, 0x16, 0xa9, 0x02,
    0x37, 0x9c, 0x72, 0x38,
]);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Network {
    Ethereum,
    Sepolia,
    BinanceSmartChain,
    BscTestnet,
    Polygon,
    PolygonAmoy,
    Localhost,
    Hardhat,
    Custom(u64),
}

impl Network {
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 => Network::Ethereum,
            11155111 => Network::Sepolia,
            56 => Network::BinanceSmartChain,
            97 => Network::BscTestnet,
            137 => Network::Polygon,
            80002 => Network::PolygonAmoy,
            1337 => Network::Localhost,
            31337 => Network::Hardhat,
            id => Network::Custom(id),
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Sepolia => 11155111,
            Network::BinanceSmartChain => 56,
            Network::BscTestnet => 97,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
            Network::Localhost => 1337,
            Network::Hardhat => 31337,
            Network::Custom(id) => *id,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Network::Ethereum => "Ethereum Mainnet".to_string(),
            Network::Sepolia => "Sepolia".to_string(),
            Network::BinanceSmartChain => "BNB Smart Chain".to_string(),
            Network::BscTestnet => "BNB Smart Chain Testnet".to_string(),
            Network::Polygon => "Polygon".to_string(),
            Network::PolygonAmoy => "Polygon Amoy".to_string(),
            Network::Localhost => "Localhost".to_string(),
            Network::Hardhat => "Hardhat".to_string(),
            Network::Custom(id) => format!("Chain {}", id),
        }
    }

    pub fn explorer_url(&self) -> Option<&'static str> {
        match self {
            Network::Ethereum => Some("https://etherscan.io"),
            Network::Sepolia => Some("https://sepolia.etherscan.io"),
            Network::BinanceSmartChain => Some("https://bscscan.com"),
            Network::BscTestnet => Some("https://testnet.bscscan.com"),
            Network::Polygon => Some("https://polygonscan.com"),
            Network::PolygonAmoy => Some("https://amoy.polygonscan.com"),
            Network::Localhost | Network::Hardhat | Network::Custom(_) => None,
        }
    }

    /// Block explorer link for a transaction, when the network has a public explorer.
    pub fn tx_link(&self, hash: &H256) -> Option<String> {
        self.explorer_url()
            .map(|base| format!("{}/tx/{:?}", base, hash))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.chain_id())
    }
}

/// Stable cache key for a catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    pub symbol: String,
    pub chain_id: u64,
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.chain_id)
    }
}

/// Payable asset. A `contract_address` marks a contract-based token; without
/// one the token is the chain's native currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub chain_id: u64,
    pub decimals: u8,
    #[serde(default)]
    pub contract_address: Option<Address>,
    pub price_feed_id: String,
}

impl Token {
    pub fn native(symbol: &str, chain_id: u64, decimals: u8, price_feed_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            chain_id,
            decimals,
            contract_address: None,
            price_feed_id: price_feed_id.to_string(),
        }
    }

    pub fn contract(
        symbol: &str,
        chain_id: u64,
        decimals: u8,
        contract_address: Address,
        price_feed_id: &str,
    ) -> Self {
        Self {
            contract_address: Some(contract_address),
            ..Self::native(symbol, chain_id, decimals, price_feed_id)
        }
    }

    pub fn key(&self) -> TokenKey {
        TokenKey {
            symbol: self.symbol.clone(),
            chain_id: self.chain_id,
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract_address.is_none()
    }

    pub fn network(&self) -> Network {
        Network::from_chain_id(self.chain_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// A submitted transfer. Status only moves `Pending -> Confirmed | Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub hash: H256,
    status: TxStatus,
}

impl PaymentTransaction {
    pub fn pending(hash: H256) -> Self {
        Self {
            hash,
            status: TxStatus::Pending,
        }
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Moves a pending transaction to a terminal status. Returns false and
    /// leaves the record untouched when it is already terminal.
    pub fn settle(&mut self, status: TxStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

/// Where a payment widget stands in `Idle -> Submitting -> Pending -> Confirmed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    Idle,
    Submitting,
    Pending,
    Confirmed,
    Failed,
}

impl PaymentPhase {
    pub fn is_busy(&self) -> bool {
        matches!(self, PaymentPhase::Submitting | PaymentPhase::Pending)
    }
}

/// `0x1234...7890` style label for notifications.
pub fn short_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_round_trips_known_ids() {
        for id in [1, 11155111, 56, 97, 137, 80002, 1337, 31337, 4242] {
            assert_eq!(Network::from_chain_id(id).chain_id(), id);
        }
        assert_eq!(Network::from_chain_id(4242), Network::Custom(4242));
    }

    #[test]
    fn test_tx_link() {
        let hash = H256::from_low_u64_be(7);
        let link = Network::Sepolia.tx_link(&hash).unwrap();
        assert!(link.starts_with("https://sepolia.etherscan.io/tx/0x"));
        assert!(link.ends_with("07"));
        assert_eq!(Network::Hardhat.tx_link(&hash), None);
    }

    #[test]
    fn test_transaction_status_is_immutable_once_terminal() {
        let mut tx = PaymentTransaction::pending(H256::zero());
        assert!(!tx.settle(TxStatus::Pending));
        assert!(tx.settle(TxStatus::Confirmed));
        assert!(!tx.settle(TxStatus::Failed));
        assert_eq!(tx.status(), TxStatus::Confirmed);
    }

    #[test]
    fn test_short_address() {
        let address: Address = "0x1234567890123456789012345678901234567890".parse().unwrap();
        assert_eq!(short_address(&address), "0x1234...7890");
    }

    #[test]
    fn test_token_kind() {
        let eth = Token::native("ETH", 11155111, 18, "ethereum");
        let usdc = Token::contract("USDC", 11155111, 6, SEPOLIA_USDC, "usd-coin");
        assert!(eth.is_native());
        assert!(!usdc.is_native());
        assert_ne!(eth.key(), usdc.key());
        assert_eq!(usdc.network(), Network::Sepolia);
    }
}
