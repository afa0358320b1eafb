//! Analytics ledger for settled payments and sponsor gas spend.
//!
//! The chain is the ledger of record; these tables exist for dashboards and
//! reporting. Both inserts are idempotent on their natural keys, so retried
//! settlements and duplicate in-flight joins never double-count. A failed
//! write is logged and swallowed: it must never change the HTTP outcome of a
//! settlement that the chain has already decided.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::instrument;
use url::Url;

use crate::networks::Network;
use crate::types::{EvmAddress, Scheme, TokenAmount, TransactionHash};

/// One settled payment, keyed by its transaction hash.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub transaction_hash: TransactionHash,
    pub payer: EvmAddress,
    pub recipient: EvmAddress,
    pub sponsor: Option<EvmAddress>,
    pub amount: TokenAmount,
    pub asset: EvmAddress,
    pub network: Network,
    pub scheme: Scheme,
    pub vendor_domain: Option<String>,
    pub vendor_endpoint: Option<String>,
    pub settled_at: DateTime<Utc>,
}

/// Gas spent by a sponsor wallet on one transaction.
#[derive(Debug, Clone)]
pub struct SponsorSpendRecord {
    pub sponsor_wallet_id: i64,
    pub transaction_hash: TransactionHash,
    pub gas_cost_wei: U256,
    pub agent: EvmAddress,
    pub chain_id: u64,
    pub spent_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger write failed: {0}")]
    Write(String),
}

/// Write interface of the analytics store.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert into `x402_transactions`; a duplicate hash is a success.
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), LedgerError>;

    /// Insert into `sponsor_spending`; a duplicate `(wallet, hash)` pair is a
    /// success.
    async fn record_sponsor_spend(&self, record: &SponsorSpendRecord) -> Result<(), LedgerError>;
}

/// Split a vendor resource URL into the `(domain, endpoint)` pair stored with
/// each transaction.
pub fn vendor_parts(resource: &Url) -> (Option<String>, Option<String>) {
    let domain = resource.host_str().map(str::to_string);
    let endpoint = Some(resource.path().to_string()).filter(|p| !p.is_empty());
    (domain, endpoint)
}

/// Postgres-backed ledger.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: sqlx::PgPool,
}

impl PgLedger {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip_all, err, fields(tx = %record.transaction_hash, network = %record.network))]
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO x402_transactions (
                transaction_hash, payer_address, recipient_address, sponsor_address,
                amount_atomic, asset_address, network, chain_id, scheme, status,
                vendor_domain, vendor_endpoint, settled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'settled', $10, $11, $12)
            ON CONFLICT (transaction_hash) DO NOTHING
            "#,
        )
        .bind(record.transaction_hash.to_string())
        .bind(record.payer.to_string())
        .bind(record.recipient.to_string())
        .bind(record.sponsor.map(|s| s.to_string()))
        .bind(record.amount.to_string())
        .bind(record.asset.to_string())
        .bind(record.network.name())
        .bind(record.network.chain_id() as i64)
        .bind(record.scheme.to_string())
        .bind(&record.vendor_domain)
        .bind(&record.vendor_endpoint)
        .bind(record.settled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Write(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip_all, err, fields(tx = %record.transaction_hash, wallet = record.sponsor_wallet_id))]
    async fn record_sponsor_spend(&self, record: &SponsorSpendRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO sponsor_spending (
                sponsor_wallet_id, tx_hash, gas_cost_wei, agent_address, chain_id, spent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sponsor_wallet_id, tx_hash) DO NOTHING
            "#,
        )
        .bind(record.sponsor_wallet_id)
        .bind(record.transaction_hash.to_string())
        .bind(record.gas_cost_wei.to_string())
        .bind(record.agent.to_string())
        .bind(record.chain_id as i64)
        .bind(record.spent_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Write(e.to_string()))?;
        Ok(())
    }
}

/// Ledger used when no database is configured: drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLedger;

#[async_trait]
impl Ledger for NullLedger {
    async fn record_transaction(&self, _record: &TransactionRecord) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn record_sponsor_spend(&self, _record: &SponsorSpendRecord) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// In-memory ledger with the same idempotency semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    transactions: Mutex<Vec<TransactionRecord>>,
    spends: Mutex<Vec<SponsorSpendRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().expect("transactions lock").clone()
    }

    pub fn spends(&self) -> Vec<SponsorSpendRecord> {
        self.spends.lock().expect("spends lock").clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), LedgerError> {
        let mut transactions = self.transactions.lock().expect("transactions lock");
        if !transactions
            .iter()
            .any(|t| t.transaction_hash == record.transaction_hash)
        {
            transactions.push(record.clone());
        }
        Ok(())
    }

    async fn record_sponsor_spend(&self, record: &SponsorSpendRecord) -> Result<(), LedgerError> {
        let mut spends = self.spends.lock().expect("spends lock");
        if !spends.iter().any(|s| {
            s.sponsor_wallet_id == record.sponsor_wallet_id
                && s.transaction_hash == record.transaction_hash
        }) {
            spends.push(record.clone());
        }
        Ok(())
    }
}
