//! Settlement engine: the only component allowed to advance the lifecycle of
//! a payment authorization.
//!
//! Per settlement key `(from, nonce)` the engine guarantees:
//!
//! - **In-flight deduplication.** Concurrent settle calls for the same key
//!   join one execution and observe one terminal result. The map entry is
//!   inserted before any I/O and removed only once the result is resolved.
//! - **Ordering.** verify → consume quota → resolve sponsor → submit → await
//!   receipt → reconcile if needed → ledger writes.
//! - **Reconciliation.** After any reported submission failure the chain's
//!   `authorizationState` is the source of truth. A used nonce is promoted to
//!   success, recovering the transaction hash from recent `Transfer` logs
//!   where possible; an unused nonce earns exactly one retry.
//! - **Detachment.** Settlements run on their own task and ignore caller
//!   cancellation: aborting a chain-affecting operation mid-flight could
//!   produce a phantom charge.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, instrument};

use crate::chain::ChainOps;
use crate::facilitator::PaymentError;
use crate::gate::Gate;
use crate::ledger::{Ledger, SponsorSpendRecord, TransactionRecord, vendor_parts};
use crate::networks::Network;
use crate::oracle::{self, SettledTx, SignerOracle};
use crate::provider_cache::ProviderMap;
use crate::sponsor::{SponsorDirectory, SponsorWallet};
use crate::types::{
    ErrorReason, EvmAddress, HexEncodedNonce, SettleRequest, SettleResponse, TransactionHash,
};
use crate::verify;

/// Identity of one settlement: at most one in flight per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettlementKey {
    pub from: EvmAddress,
    pub nonce: HexEncodedNonce,
}

/// Tunables of the settlement engine.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Pause before consulting `authorizationState` after a failure, giving
    /// chain state time to propagate.
    pub reconcile_delay: Duration,
    /// Wall-clock span the transfer-log recovery scan should cover; converted
    /// to blocks per chain.
    pub log_scan_seconds: u64,
    /// Upper clamp applied to the vendor's `maxTimeoutSeconds` when waiting
    /// for a receipt.
    pub receipt_timeout_max: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            reconcile_delay: Duration::from_secs(1),
            log_scan_seconds: 60,
            receipt_timeout_max: Duration::from_secs(300),
        }
    }
}

/// Terminal result of one settlement, shared by every joined caller.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub success: bool,
    pub transaction: Option<TransactionHash>,
    pub reason: Option<ErrorReason>,
    pub payer: EvmAddress,
    pub network: Network,
}

impl From<SettleOutcome> for SettleResponse {
    fn from(outcome: SettleOutcome) -> Self {
        SettleResponse {
            success: outcome.success,
            error_reason: outcome.reason,
            payer: outcome.payer,
            transaction: outcome.transaction,
            network: outcome.network,
        }
    }
}

/// How a settlement reached success.
enum Settled {
    /// We hold the receipt of our own transaction.
    Confirmed(SettledTx),
    /// The chain reports the authorization as consumed; the hash may have
    /// been recovered from recent transfer logs.
    Recovered(Option<TransactionHash>),
}

pub struct SettlementEngine {
    chains: Arc<dyn ProviderMap>,
    oracle: Arc<dyn SignerOracle>,
    sponsors: Arc<dyn SponsorDirectory>,
    ledger: Arc<dyn Ledger>,
    gate: Arc<Gate>,
    inflight: DashMap<SettlementKey, watch::Receiver<Option<SettleOutcome>>>,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        chains: Arc<dyn ProviderMap>,
        oracle: Arc<dyn SignerOracle>,
        sponsors: Arc<dyn SponsorDirectory>,
        ledger: Arc<dyn Ledger>,
        gate: Arc<Gate>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            chains,
            oracle,
            sponsors,
            ledger,
            gate,
            inflight: DashMap::new(),
            config,
        }
    }

    /// Number of settlements currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Settle a payment, joining an identical in-flight settlement if one
    /// exists.
    #[instrument(skip_all, fields(
        network = %request.payment_payload.network,
        payer = %request.payment_payload.payload.authorization.from,
        nonce = %request.payment_payload.payload.authorization.nonce,
    ))]
    pub async fn settle(self: &Arc<Self>, request: &SettleRequest) -> SettleResponse {
        let authorization = &request.payment_payload.payload.authorization;
        let key = SettlementKey {
            from: authorization.from,
            nonce: authorization.nonce,
        };

        // The lock on the map shard is held only for the insert; the watch
        // channel is what joined callers actually wait on.
        let (leader, mut receiver) = match self.inflight.entry(key) {
            Entry::Occupied(entry) => (None, entry.get().clone()),
            Entry::Vacant(vacancy) => {
                let (sender, receiver) = watch::channel(None);
                vacancy.insert(receiver.clone());
                (Some(sender), receiver)
            }
        };

        if let Some(sender) = leader {
            let engine = Arc::clone(self);
            let request = request.clone();
            // Detached: the settlement survives the HTTP client hanging up.
            tokio::spawn(
                async move {
                    let outcome = engine.run_settlement(&request, key).await;
                    let _ = sender.send(Some(outcome));
                    engine.inflight.remove(&key);
                }
                .in_current_span(),
            );
        } else {
            tracing::info!("joining in-flight settlement");
        }

        let payer = authorization.from;
        let network = request.payment_payload.network;
        let resolved = match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => Some(outcome.clone()),
            Err(_) => None,
        };
        match resolved {
            Some(outcome) => outcome.expect("waited for a resolved outcome").into(),
            None => {
                // The executing task died without a result. Clear the stale
                // entry (and only it, should a newer settlement have replaced
                // it already) so future attempts can start fresh.
                self.inflight
                    .remove_if(&key, |_, stale| stale.same_channel(&receiver));
                SettleOutcome {
                    success: false,
                    transaction: None,
                    reason: Some(ErrorReason::Internal),
                    payer,
                    network,
                }
                .into()
            }
        }
    }

    /// One full pass of the settlement state machine.
    async fn run_settlement(&self, request: &SettleRequest, key: SettlementKey) -> SettleOutcome {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let payer = key.from;
        let network = payload.network;

        let failure = |reason: ErrorReason| SettleOutcome {
            success: false,
            transaction: None,
            reason: Some(reason),
            payer,
            network,
        };

        let Some(chain) = self.chains.by_network(network) else {
            return failure(PaymentError::UnsupportedNetwork(network).reason());
        };

        // Init -> Verified | Failure. A nonce already consumed on-chain is
        // terminal success territory, not failure: either our own earlier
        // attempt landed or a duplicate submission beat us, and the chain is
        // the ledger of record.
        match verify::assert_valid_payment(chain.as_ref(), payload, requirements).await {
            Ok(_) => {}
            Err(PaymentError::NonceUsed) => {
                let recovered = self.recover_transaction(chain.as_ref(), request).await;
                return self
                    .finish_success(chain.as_ref(), request, None, Settled::Recovered(recovered))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "settlement rejected during verification");
                return failure(e.reason());
            }
        }

        // Quota advances only for payments that verified.
        self.gate.consume_quota(payer);

        let wallet = match self.sponsors.find(payer, network).await {
            Ok(Some(wallet)) => wallet,
            Ok(None) => return failure(PaymentError::NoSponsor(payer).reason()),
            Err(e) => {
                tracing::error!(error = %e, "sponsor lookup failed");
                return failure(ErrorReason::Internal);
            }
        };

        let receipt_deadline = Duration::from_secs(requirements.max_timeout_seconds)
            .min(self.config.receipt_timeout_max);

        // Verified -> Submitted -> Confirming.
        let first_attempt = oracle::execute(
            chain.as_ref(),
            self.oracle.as_ref(),
            &wallet,
            requirements.asset,
            &payload.payload,
            receipt_deadline,
        )
        .await;

        let settled = match first_attempt {
            Ok(tx) => Ok(Settled::Confirmed(tx)),
            // Confirming -> Reconciling.
            Err(first_error) => {
                self.reconcile(chain.as_ref(), request, &wallet, receipt_deadline, first_error)
                    .await
            }
        };

        match settled {
            Ok(settled) => {
                self.finish_success(chain.as_ref(), request, Some(&wallet), settled)
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "settlement failed after reconciliation");
                failure(e.reason())
            }
        }
    }

    /// Reconciliation policy: the on-chain authorization state decides.
    ///
    /// Called after any reported failure. Waits for chain state to propagate,
    /// then either promotes the settlement to success (nonce used), retries
    /// exactly once (nonce unused), or gives up carrying the original error.
    #[instrument(skip_all, err, fields(cause = %first_error))]
    async fn reconcile(
        &self,
        chain: &dyn ChainOps,
        request: &SettleRequest,
        wallet: &SponsorWallet,
        receipt_deadline: Duration,
        first_error: PaymentError,
    ) -> Result<Settled, PaymentError> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let authorization = &payload.payload.authorization;

        tokio::time::sleep(self.config.reconcile_delay).await;

        match chain
            .authorization_state(requirements.asset, authorization.from, authorization.nonce)
            .await
        {
            Ok(true) => {
                // The payment did settle; the reported failure was a lie or a
                // race. Never report failure against the chain's word.
                let recovered = self.recover_transaction(chain, request).await;
                Ok(Settled::Recovered(recovered))
            }
            Ok(false) => {
                // Reconciling -> Submitted': one retry for this key.
                tracing::info!("nonce unused on-chain, retrying submission once");
                match oracle::execute(
                    chain,
                    self.oracle.as_ref(),
                    wallet,
                    requirements.asset,
                    &payload.payload,
                    receipt_deadline,
                )
                .await
                {
                    Ok(tx) => Ok(Settled::Confirmed(tx)),
                    Err(retry_error) => {
                        tracing::warn!(error = %retry_error, "retry failed, consulting chain again");
                        match chain
                            .authorization_state(
                                requirements.asset,
                                authorization.from,
                                authorization.nonce,
                            )
                            .await
                        {
                            Ok(true) => {
                                let recovered = self.recover_transaction(chain, request).await;
                                Ok(Settled::Recovered(recovered))
                            }
                            // The original error message is what the caller
                            // gets; the retry's is logged above.
                            _ => Err(first_error),
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "authorizationState unreadable during reconciliation");
                Err(first_error)
            }
        }
    }

    /// Scan recent `Transfer` logs for the settled payment's hash.
    async fn recover_transaction(
        &self,
        chain: &dyn ChainOps,
        request: &SettleRequest,
    ) -> Option<TransactionHash> {
        let payload = &request.payment_payload;
        let authorization = &payload.payload.authorization;
        let window = payload
            .network
            .blocks_for_seconds(self.config.log_scan_seconds);
        match chain
            .find_transfer(
                request.payment_requirements.asset,
                authorization.from,
                authorization.to,
                authorization.value,
                window,
            )
            .await
        {
            Ok(found) => {
                if found.is_none() {
                    tracing::warn!(
                        window_blocks = window,
                        "authorization consumed but no matching transfer log in window"
                    );
                }
                found
            }
            Err(e) => {
                tracing::warn!(error = %e, "transfer log scan failed");
                None
            }
        }
    }

    /// Build the success outcome and feed the analytics ledger.
    ///
    /// Ledger writes run after the terminal state is known and never affect
    /// the returned outcome.
    async fn finish_success(
        &self,
        chain: &dyn ChainOps,
        request: &SettleRequest,
        wallet: Option<&SponsorWallet>,
        settled: Settled,
    ) -> SettleOutcome {
        let payload = &request.payment_payload;
        let authorization = &payload.payload.authorization;

        let (transaction, gas_cost_wei) = match &settled {
            Settled::Confirmed(tx) => (Some(tx.tx_hash), Some(tx.gas_cost_wei)),
            Settled::Recovered(Some(tx_hash)) => {
                // Try to backfill gas accounting from the recovered receipt;
                // the transaction is already mined so this is a single read.
                let gas = chain
                    .wait_for_receipt(*tx_hash, Duration::from_secs(10))
                    .await
                    .ok()
                    .map(|receipt| receipt.gas_cost_wei);
                (Some(*tx_hash), gas)
            }
            Settled::Recovered(None) => (None, None),
        };

        if let Some(transaction) = transaction {
            let (vendor_domain, vendor_endpoint) =
                vendor_parts(&request.payment_requirements.resource);
            let record = TransactionRecord {
                transaction_hash: transaction,
                payer: authorization.from,
                recipient: authorization.to,
                sponsor: wallet.map(|w| w.sponsor_address),
                amount: authorization.value,
                asset: request.payment_requirements.asset,
                network: payload.network,
                scheme: payload.scheme,
                vendor_domain,
                vendor_endpoint,
                settled_at: chrono::Utc::now(),
            };
            if let Err(e) = self.ledger.record_transaction(&record).await {
                tracing::error!(error = %e, tx = %transaction, "transaction ledger write failed");
            }
            if let (Some(wallet), Some(gas_cost_wei)) = (wallet, gas_cost_wei) {
                let spend = SponsorSpendRecord {
                    sponsor_wallet_id: wallet.id,
                    transaction_hash: transaction,
                    gas_cost_wei,
                    agent: authorization.from,
                    chain_id: payload.network.chain_id(),
                    spent_at: chrono::Utc::now(),
                };
                if let Err(e) = self.ledger.record_sponsor_spend(&spend).await {
                    tracing::error!(error = %e, tx = %transaction, "sponsor spend ledger write failed");
                }
            }
            tracing::info!(tx = %transaction, "settlement succeeded");
        } else {
            tracing::info!("settlement succeeded with no recoverable transaction hash");
        }

        SettleOutcome {
            success: true,
            transaction,
            reason: None,
            payer: authorization.from,
            network: payload.network,
        }
    }
}
