//! Chain provider cache and initialization logic.
//!
//! One JSON-RPC provider per configured network, connected once at startup
//! and shared by every request. Networks without an RPC URL in the
//! environment are skipped with a warning and simply not offered by
//! `/supported`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::ChainOps;
use crate::chain::evm::EvmChainProvider;
use crate::config::Config;
use crate::networks::Network;

/// A map from network to a shared chain handle.
///
/// The settlement engine and the verifier only ever see this trait, which is
/// what lets tests swap in scripted chains.
pub trait ProviderMap: Send + Sync {
    /// Returns the chain handle for the given network, if configured.
    fn by_network(&self, network: Network) -> Option<Arc<dyn ChainOps>>;

    /// Networks with a configured provider.
    fn networks(&self) -> Vec<Network>;
}

/// The production [`ProviderMap`], built from configuration at startup.
#[derive(Clone)]
pub struct ProviderCache {
    providers: HashMap<Network, Arc<dyn ChainOps>>,
}

impl ProviderCache {
    /// Connects a provider for every network with a configured RPC URL.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers: HashMap<Network, Arc<dyn ChainOps>> = HashMap::new();
        for network in Network::variants() {
            match config.rpc_urls.get(network) {
                Some(rpc_url) => {
                    let provider = EvmChainProvider::try_new(rpc_url.as_str(), *network).await?;
                    providers.insert(*network, Arc::new(provider));
                    tracing::info!("Initialized provider for {} at {}", network, rpc_url);
                }
                None => {
                    tracing::warn!("No RPC URL configured for {} (skipped)", network);
                }
            }
        }
        Ok(Self { providers })
    }
}

impl ProviderMap for ProviderCache {
    fn by_network(&self, network: Network) -> Option<Arc<dyn ChainOps>> {
        self.providers.get(&network).cloned()
    }

    fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.providers.keys().copied().collect();
        networks.sort_by_key(|n| n.chain_id());
        networks
    }
}
