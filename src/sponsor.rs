//! Sponsor wallet resolution.
//!
//! A sponsor wallet pays gas for a payer's authorizations, giving the payer a
//! gasless settlement path. Resolution is two-tier: an enabled agent-whitelist
//! rule naming the payer wins first (highest priority), otherwise a wallet
//! directly owned by the payer. Payer addresses are normalized to lowercase
//! before any lookup.

use async_trait::async_trait;
use sqlx::Row;
use std::sync::RwLock;
use tracing::instrument;

use crate::networks::Network;
use crate::types::EvmAddress;

/// An operator-provisioned wallet able to fund gas on one network.
///
/// `signer_handle` and `signer_user_share` are opaque to us; they are passed
/// through verbatim to the signer oracle, which owns the key material.
#[derive(Debug, Clone)]
pub struct SponsorWallet {
    pub id: i64,
    pub user_wallet_address: EvmAddress,
    pub network: Network,
    pub sponsor_address: EvmAddress,
    pub signer_handle: String,
    pub signer_user_share: Option<String>,
}

/// Kinds of sponsor rules. Only agent whitelisting exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SponsorRuleType {
    AgentWhitelist,
}

impl SponsorRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SponsorRuleType::AgentWhitelist => "agent_whitelist",
        }
    }
}

/// Grants a payer (agent) access to a sponsor wallet it does not own.
#[derive(Debug, Clone)]
pub struct SponsorRule {
    pub id: i64,
    pub sponsor_wallet_id: i64,
    pub rule_type: SponsorRuleType,
    pub agent_address: EvmAddress,
    pub enabled: bool,
    pub priority: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum SponsorError {
    #[error("Sponsor lookup failed: {0}")]
    Lookup(String),
}

/// Lookup interface for sponsor wallets.
#[async_trait]
pub trait SponsorDirectory: Send + Sync {
    /// Returns the sponsor wallet that will fund gas for `payer` on
    /// `network`, or `None` when nobody sponsors this payer.
    async fn find(
        &self,
        payer: EvmAddress,
        network: Network,
    ) -> Result<Option<SponsorWallet>, SponsorError>;
}

/// Postgres-backed sponsor directory.
#[derive(Debug, Clone)]
pub struct PgSponsorDirectory {
    pool: sqlx::PgPool,
}

impl PgSponsorDirectory {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    fn wallet_from_row(row: &sqlx::postgres::PgRow) -> Result<SponsorWallet, SponsorError> {
        let network: String = row
            .try_get("network")
            .map_err(|e| SponsorError::Lookup(e.to_string()))?;
        let network: Network = network
            .parse()
            .map_err(|e| SponsorError::Lookup(format!("{e}")))?;
        let user_wallet_address: String = row
            .try_get("user_wallet_address")
            .map_err(|e| SponsorError::Lookup(e.to_string()))?;
        let sponsor_address: String = row
            .try_get("sponsor_address")
            .map_err(|e| SponsorError::Lookup(e.to_string()))?;
        Ok(SponsorWallet {
            id: row
                .try_get("id")
                .map_err(|e| SponsorError::Lookup(e.to_string()))?,
            user_wallet_address: user_wallet_address
                .parse()
                .map_err(|_| SponsorError::Lookup("bad user_wallet_address".into()))?,
            network,
            sponsor_address: sponsor_address
                .parse()
                .map_err(|_| SponsorError::Lookup("bad sponsor_address".into()))?,
            signer_handle: row
                .try_get("signer_handle")
                .map_err(|e| SponsorError::Lookup(e.to_string()))?,
            signer_user_share: row
                .try_get("signer_user_share")
                .map_err(|e| SponsorError::Lookup(e.to_string()))?,
        })
    }
}

#[async_trait]
impl SponsorDirectory for PgSponsorDirectory {
    #[instrument(skip_all, err, fields(payer = %payer, network = %network))]
    async fn find(
        &self,
        payer: EvmAddress,
        network: Network,
    ) -> Result<Option<SponsorWallet>, SponsorError> {
        let payer_key = payer.to_string();

        let whitelisted = sqlx::query(
            r#"
            SELECT w.id, w.user_wallet_address, w.network, w.sponsor_address,
                   w.signer_handle, w.signer_user_share
            FROM sponsor_rules r
            JOIN sponsor_wallets w ON w.id = r.sponsor_wallet_id
            WHERE r.rule_type = $1
              AND r.agent_address = $2
              AND r.enabled
              AND w.network = $3
            ORDER BY r.priority DESC
            LIMIT 1
            "#,
        )
        .bind(SponsorRuleType::AgentWhitelist.as_str())
        .bind(&payer_key)
        .bind(network.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SponsorError::Lookup(e.to_string()))?;

        if let Some(row) = whitelisted {
            return Ok(Some(Self::wallet_from_row(&row)?));
        }

        let owned = sqlx::query(
            r#"
            SELECT w.id, w.user_wallet_address, w.network, w.sponsor_address,
                   w.signer_handle, w.signer_user_share
            FROM sponsor_wallets w
            WHERE w.user_wallet_address = $1
              AND w.network = $2
            LIMIT 1
            "#,
        )
        .bind(&payer_key)
        .bind(network.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SponsorError::Lookup(e.to_string()))?;

        owned.map(|row| Self::wallet_from_row(&row)).transpose()
    }
}

/// In-memory sponsor directory for tests and database-less deployments.
#[derive(Debug, Default)]
pub struct MemorySponsorDirectory {
    wallets: RwLock<Vec<SponsorWallet>>,
    rules: RwLock<Vec<SponsorRule>>,
}

impl MemorySponsorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, wallet: SponsorWallet) {
        self.wallets.write().expect("wallets lock").push(wallet);
    }

    pub fn add_rule(&self, rule: SponsorRule) {
        self.rules.write().expect("rules lock").push(rule);
    }
}

#[async_trait]
impl SponsorDirectory for MemorySponsorDirectory {
    async fn find(
        &self,
        payer: EvmAddress,
        network: Network,
    ) -> Result<Option<SponsorWallet>, SponsorError> {
        let wallets = self.wallets.read().expect("wallets lock");
        let rules = self.rules.read().expect("rules lock");

        let mut candidates: Vec<&SponsorRule> = rules
            .iter()
            .filter(|r| {
                r.rule_type == SponsorRuleType::AgentWhitelist
                    && r.enabled
                    && r.agent_address == payer
            })
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        for rule in candidates {
            let wallet = wallets
                .iter()
                .find(|w| w.id == rule.sponsor_wallet_id && w.network == network);
            if let Some(wallet) = wallet {
                return Ok(Some(wallet.clone()));
            }
        }

        Ok(wallets
            .iter()
            .find(|w| w.user_wallet_address == payer && w.network == network)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(id: i64, owner: &str, sponsor: &str) -> SponsorWallet {
        SponsorWallet {
            id,
            user_wallet_address: owner.parse().unwrap(),
            network: Network::BaseSepolia,
            sponsor_address: sponsor.parse().unwrap(),
            signer_handle: format!("handle-{id}"),
            signer_user_share: None,
        }
    }

    const PAYER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    #[tokio::test]
    async fn test_direct_ownership_lookup() {
        let directory = MemorySponsorDirectory::new();
        directory.add_wallet(wallet(1, PAYER, "0x1111111111111111111111111111111111111111"));

        let found = directory
            .find(PAYER.parse().unwrap(), Network::BaseSepolia)
            .await
            .unwrap()
            .expect("wallet");
        assert_eq!(found.id, 1);

        let missing = directory
            .find(OTHER.parse().unwrap(), Network::BaseSepolia)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_whitelist_rule_beats_ownership() {
        let directory = MemorySponsorDirectory::new();
        directory.add_wallet(wallet(1, PAYER, "0x1111111111111111111111111111111111111111"));
        directory.add_wallet(wallet(2, OTHER, "0x2222222222222222222222222222222222222222"));
        directory.add_rule(SponsorRule {
            id: 10,
            sponsor_wallet_id: 2,
            rule_type: SponsorRuleType::AgentWhitelist,
            agent_address: PAYER.parse().unwrap(),
            enabled: true,
            priority: 5,
        });

        let found = directory
            .find(PAYER.parse().unwrap(), Network::BaseSepolia)
            .await
            .unwrap()
            .expect("wallet");
        assert_eq!(found.id, 2);
    }

    #[tokio::test]
    async fn test_disabled_rules_are_ignored_and_priority_wins() {
        let directory = MemorySponsorDirectory::new();
        directory.add_wallet(wallet(1, OTHER, "0x1111111111111111111111111111111111111111"));
        directory.add_wallet(wallet(2, OTHER, "0x2222222222222222222222222222222222222222"));
        directory.add_wallet(wallet(3, OTHER, "0x3333333333333333333333333333333333333333"));
        directory.add_rule(SponsorRule {
            id: 10,
            sponsor_wallet_id: 1,
            rule_type: SponsorRuleType::AgentWhitelist,
            agent_address: PAYER.parse().unwrap(),
            enabled: false,
            priority: 100,
        });
        directory.add_rule(SponsorRule {
            id: 11,
            sponsor_wallet_id: 2,
            rule_type: SponsorRuleType::AgentWhitelist,
            agent_address: PAYER.parse().unwrap(),
            enabled: true,
            priority: 1,
        });
        directory.add_rule(SponsorRule {
            id: 12,
            sponsor_wallet_id: 3,
            rule_type: SponsorRuleType::AgentWhitelist,
            agent_address: PAYER.parse().unwrap(),
            enabled: true,
            priority: 9,
        });

        let found = directory
            .find(PAYER.parse().unwrap(), Network::BaseSepolia)
            .await
            .unwrap()
            .expect("wallet");
        assert_eq!(found.id, 3);
    }
}
