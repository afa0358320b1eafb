//! Network registry and known USDC deployments.
//!
//! This module is the single source of truth for the chains this facilitator
//! can settle on. Each network maps to a chain id, a CAIP-2 identifier, a
//! canonical USDC deployment with its EIP-712 domain metadata, a block explorer
//! URL template, and a nominal block time used to size transfer-log scans.

use alloy_primitives::address;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use crate::chain::chain_id::ChainId;
use crate::types::{EvmAddress, TokenAsset, TokenAssetEip712};

/// Supported EVM networks.
///
/// The set is closed: a payment naming any other network is rejected before
/// any network I/O happens.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    BaseSepolia,
    /// Avalanche C-Chain (chain ID 43114).
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    AvalancheFuji,
    /// Polygon PoS mainnet (chain ID 137).
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    PolygonAmoy,
    /// Sei EVM mainnet (chain ID 1329).
    Sei,
    /// Sei EVM testnet (chain ID 1328).
    SeiTestnet,
    /// Celo mainnet (chain ID 42220).
    Celo,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported network: {0}")]
pub struct UnsupportedNetworkError(pub String);

impl FromStr for Network {
    type Err = UnsupportedNetworkError;

    /// Accepts both the legacy network name (`base-sepolia`) and the CAIP-2
    /// form (`eip155:84532`), normalizing to the internal key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(network) = Network::variants().iter().find(|n| n.name() == s) {
            return Ok(*network);
        }
        if let Ok(chain_id) = ChainId::from_str(s) {
            return Network::try_from(&chain_id).map_err(|_| UnsupportedNetworkError(s.into()));
        }
        Err(UnsupportedNetworkError(s.into()))
    }
}

impl TryFrom<&ChainId> for Network {
    type Error = UnsupportedNetworkError;

    fn try_from(chain_id: &ChainId) -> Result<Self, Self::Error> {
        if chain_id.namespace() != "eip155" {
            return Err(UnsupportedNetworkError(chain_id.to_string()));
        }
        Network::variants()
            .iter()
            .find(|n| n.chain_id().to_string() == chain_id.reference())
            .copied()
            .ok_or_else(|| UnsupportedNetworkError(chain_id.to_string()))
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Network::from_str(&s).map_err(de::Error::custom)
    }
}

impl Network {
    /// The legacy wire name of the network.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
            Network::Avalanche => "avalanche",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Polygon => "polygon",
            Network::PolygonAmoy => "polygon-amoy",
            Network::Sei => "sei",
            Network::SeiTestnet => "sei-testnet",
            Network::Celo => "celo",
        }
    }

    /// Numeric chain id, used in transactions and EIP-712 domains.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
            Network::Sei => 1329,
            Network::SeiTestnet => 1328,
            Network::Celo => 42220,
        }
    }

    /// CAIP-2 identifier, e.g. `eip155:8453`.
    pub fn caip2(&self) -> ChainId {
        ChainId::eip155(self.chain_id())
    }

    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Sei,
            Network::SeiTestnet,
            Network::Celo,
        ]
    }

    /// Nominal block time in seconds.
    ///
    /// Used to size the transfer-log recovery window so that it covers roughly
    /// the same wall-clock span on every chain.
    pub fn block_time_secs(&self) -> u64 {
        match self {
            Network::Base | Network::BaseSepolia => 2,
            Network::Avalanche | Network::AvalancheFuji => 2,
            Network::Polygon | Network::PolygonAmoy => 2,
            Network::Sei | Network::SeiTestnet => 1,
            Network::Celo => 1,
        }
    }

    /// How many trailing blocks cover `seconds` of wall-clock time.
    pub fn blocks_for_seconds(&self, seconds: u64) -> u64 {
        seconds.div_ceil(self.block_time_secs()).max(1)
    }

    /// Block explorer URL for a transaction hash.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        let base = match self {
            Network::Base => "https://basescan.org/tx/",
            Network::BaseSepolia => "https://sepolia.basescan.org/tx/",
            Network::Avalanche => "https://snowtrace.io/tx/",
            Network::AvalancheFuji => "https://testnet.snowtrace.io/tx/",
            Network::Polygon => "https://polygonscan.com/tx/",
            Network::PolygonAmoy => "https://amoy.polygonscan.com/tx/",
            Network::Sei => "https://seitrace.com/tx/",
            Network::SeiTestnet => "https://testnet.seitrace.com/tx/",
            Network::Celo => "https://celoscan.io/tx/",
        };
        format!("{base}{tx_hash}")
    }

    /// Environment variable naming the JSON-RPC endpoint for this network.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Base => "RPC_URL_BASE",
            Network::BaseSepolia => "RPC_URL_BASE_SEPOLIA",
            Network::Avalanche => "RPC_URL_AVALANCHE",
            Network::AvalancheFuji => "RPC_URL_AVALANCHE_FUJI",
            Network::Polygon => "RPC_URL_POLYGON",
            Network::PolygonAmoy => "RPC_URL_POLYGON_AMOY",
            Network::Sei => "RPC_URL_SEI",
            Network::SeiTestnet => "RPC_URL_SEI_TESTNET",
            Network::Celo => "RPC_URL_CELO",
        }
    }
}

/// Resolve a network from either a legacy name or a CAIP-2 identifier.
pub fn resolve(identifier: &str) -> Result<Network, UnsupportedNetworkError> {
    Network::from_str(identifier)
}

static USDC_BASE: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::Base, address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")));
static USDC_BASE_SEPOLIA: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::BaseSepolia, address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")));
static USDC_AVALANCHE: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::Avalanche, address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E")));
static USDC_AVALANCHE_FUJI: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::AvalancheFuji, address!("0x5425890298aed601595a70AB815c96711a31Bc65")));
static USDC_POLYGON: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::Polygon, address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359")));
static USDC_POLYGON_AMOY: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::PolygonAmoy, address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582")));
static USDC_SEI: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::Sei, address!("0xe15fC38F6D8c56aF07bbCBe3BAf5708A2Bf42392")));
static USDC_SEI_TESTNET: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::SeiTestnet, address!("0x4fCF1784B31630811181f670Aea7A7bEF803eaED")));
static USDC_CELO: Lazy<USDCDeployment> = Lazy::new(|| usdc(Network::Celo, address!("0xcebA9300f2b948710d2653dD7B07f33A8B32118C")));

fn usdc(network: Network, address: alloy_primitives::Address) -> USDCDeployment {
    // Celo's Circle deployment registered its EIP-712 name as "USDC";
    // every other chain in the set uses "USD Coin".
    let name = match network {
        Network::Celo => "USDC",
        _ => "USD Coin",
    };
    USDCDeployment(TokenAsset {
        address: EvmAddress(address),
        network,
        decimals: 6,
        eip712: TokenAssetEip712 {
            name: name.into(),
            version: "2".into(),
        },
    })
}

/// A known USDC deployment as a wrapper around [`TokenAsset`].
#[derive(Clone, Debug)]
pub struct USDCDeployment(pub TokenAsset);

impl Deref for USDCDeployment {
    type Target = TokenAsset;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&USDCDeployment> for TokenAsset {
    fn from(deployment: &USDCDeployment) -> Self {
        deployment.0.clone()
    }
}

impl USDCDeployment {
    /// Return the known USDC deployment for the given network.
    pub fn by_network<N: Borrow<Network>>(network: N) -> &'static USDCDeployment {
        match network.borrow() {
            Network::Base => &USDC_BASE,
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
            Network::Avalanche => &USDC_AVALANCHE,
            Network::AvalancheFuji => &USDC_AVALANCHE_FUJI,
            Network::Polygon => &USDC_POLYGON,
            Network::PolygonAmoy => &USDC_POLYGON_AMOY,
            Network::Sei => &USDC_SEI,
            Network::SeiTestnet => &USDC_SEI_TESTNET,
            Network::Celo => &USDC_CELO,
        }
    }

    pub fn address(&self) -> EvmAddress {
        self.0.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_legacy_name() {
        assert_eq!(resolve("base").unwrap(), Network::Base);
        assert_eq!(resolve("base-sepolia").unwrap(), Network::BaseSepolia);
        assert_eq!(resolve("avalanche").unwrap(), Network::Avalanche);
        assert!(resolve("unknown").is_err());
    }

    #[test]
    fn test_resolve_caip2() {
        assert_eq!(resolve("eip155:8453").unwrap(), Network::Base);
        assert_eq!(resolve("eip155:84532").unwrap(), Network::BaseSepolia);
        assert_eq!(resolve("eip155:42220").unwrap(), Network::Celo);
        assert!(resolve("eip155:999999").is_err());
        assert!(resolve("solana:mainnet").is_err());
    }

    #[test]
    fn test_caip2_legacy_bijection() {
        for network in Network::variants() {
            let caip2 = network.caip2().to_string();
            assert_eq!(resolve(&caip2).unwrap(), *network);
            assert_eq!(resolve(network.name()).unwrap(), *network);
        }
    }

    #[test]
    fn test_network_deserialize_both_forms() {
        let legacy: Network = serde_json::from_str("\"base-sepolia\"").unwrap();
        let caip2: Network = serde_json::from_str("\"eip155:84532\"").unwrap();
        assert_eq!(legacy, caip2);
        assert_eq!(serde_json::to_string(&legacy).unwrap(), "\"base-sepolia\"");
    }

    #[test]
    fn test_eip712_names() {
        assert_eq!(USDCDeployment::by_network(Network::Celo).eip712.name, "USDC");
        assert_eq!(
            USDCDeployment::by_network(Network::Base).eip712.name,
            "USD Coin"
        );
        assert_eq!(USDCDeployment::by_network(Network::Base).eip712.version, "2");
    }

    #[test]
    fn test_log_window_scales_with_block_time() {
        assert_eq!(Network::Base.blocks_for_seconds(60), 30);
        assert_eq!(Network::Sei.blocks_for_seconds(60), 60);
    }
}
