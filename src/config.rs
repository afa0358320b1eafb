//! Configuration for the facilitator server.
//!
//! Everything comes from the environment (`.env` values are loaded by the
//! binary before this runs):
//!
//! - `HOST`, `PORT` — bind address.
//! - `RPC_URL_<NETWORK>` — one JSON-RPC endpoint per supported chain;
//!   networks without a URL are skipped.
//! - `SIGNER_ORACLE_URL`, `SIGNER_ORACLE_API_KEY` — the remote signing
//!   service that broadcasts sponsor-funded transactions.
//! - `DATABASE_URL` — optional Postgres for sponsors, tiers, and the ledger;
//!   without it the facilitator runs on in-memory stores.
//! - `ESCROW_ADDRESS_<NETWORK>` — optional escrow deployment enabling the
//!   `deferred` scheme capability on that chain.
//! - `LOG_SCAN_SECONDS`, `RECEIPT_TIMEOUT_MAX_SECONDS`,
//!   `SIGNER_ORACLE_TIMEOUT_SECONDS` — settlement tunables.

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::networks::Network;
use crate::types::EvmAddress;

const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_SIGNER_ORACLE_URL: &str = "SIGNER_ORACLE_URL";
const ENV_SIGNER_ORACLE_API_KEY: &str = "SIGNER_ORACLE_API_KEY";
const ENV_SIGNER_ORACLE_TIMEOUT: &str = "SIGNER_ORACLE_TIMEOUT_SECONDS";
const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_LOG_SCAN_SECONDS: &str = "LOG_SCAN_SECONDS";
const ENV_RECEIPT_TIMEOUT_MAX: &str = "RECEIPT_TIMEOUT_MAX_SECONDS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {0} not set")]
    Missing(&'static str),
    #[error("env {var} invalid: {detail}")]
    Invalid { var: String, detail: String },
}

/// Server configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub rpc_urls: HashMap<Network, Url>,
    pub oracle_url: Url,
    pub oracle_api_key: String,
    pub oracle_timeout: Duration,
    pub database_url: Option<String>,
    pub escrow_addresses: HashMap<Network, EvmAddress>,
    pub log_scan_seconds: u64,
    pub receipt_timeout_max: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host: IpAddr = parse_or(ENV_HOST, "0.0.0.0")?;
        let port: u16 = parse_or(ENV_PORT, "8080")?;

        let mut rpc_urls = HashMap::new();
        let mut escrow_addresses = HashMap::new();
        for network in Network::variants() {
            if let Ok(raw) = env::var(network.rpc_env_var()) {
                let url = raw.parse::<Url>().map_err(|e| ConfigError::Invalid {
                    var: network.rpc_env_var().into(),
                    detail: e.to_string(),
                })?;
                rpc_urls.insert(*network, url);
            }
            if let Ok(raw) = env::var(escrow_env_var(*network)) {
                let address = raw.parse::<EvmAddress>().map_err(|e| ConfigError::Invalid {
                    var: escrow_env_var(*network),
                    detail: e.to_string(),
                })?;
                escrow_addresses.insert(*network, address);
            }
        }

        let oracle_url = env::var(ENV_SIGNER_ORACLE_URL)
            .map_err(|_| ConfigError::Missing(ENV_SIGNER_ORACLE_URL))?
            .parse::<Url>()
            .map_err(|e| ConfigError::Invalid {
                var: ENV_SIGNER_ORACLE_URL.into(),
                detail: e.to_string(),
            })?;
        let oracle_api_key = env::var(ENV_SIGNER_ORACLE_API_KEY)
            .map_err(|_| ConfigError::Missing(ENV_SIGNER_ORACLE_API_KEY))?;
        let oracle_timeout = Duration::from_secs(parse_or(ENV_SIGNER_ORACLE_TIMEOUT, "30")?);

        let database_url = env::var(ENV_DATABASE_URL).ok();
        let log_scan_seconds = parse_or(ENV_LOG_SCAN_SECONDS, "60")?;
        let receipt_timeout_max = Duration::from_secs(parse_or(ENV_RECEIPT_TIMEOUT_MAX, "300")?);

        Ok(Config {
            host,
            port,
            rpc_urls,
            oracle_url,
            oracle_api_key,
            oracle_timeout,
            database_url,
            escrow_addresses,
            log_scan_seconds,
            receipt_timeout_max,
        })
    }

    /// Whether the `deferred` scheme can be advertised for `network`.
    pub fn has_escrow(&self, network: Network) -> bool {
        self.escrow_addresses.contains_key(&network)
    }
}

fn escrow_env_var(network: Network) -> String {
    let suffix = network
        .rpc_env_var()
        .trim_start_matches("RPC_URL_")
        .to_string();
    format!("ESCROW_ADDRESS_{suffix}")
}

fn parse_or<T>(var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        var: var.into(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_env_var_names() {
        assert_eq!(escrow_env_var(Network::Base), "ESCROW_ADDRESS_BASE");
        assert_eq!(
            escrow_env_var(Network::BaseSepolia),
            "ESCROW_ADDRESS_BASE_SEPOLIA"
        );
        assert_eq!(
            escrow_env_var(Network::AvalancheFuji),
            "ESCROW_ADDRESS_AVALANCHE_FUJI"
        );
    }
}
