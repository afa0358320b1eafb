//! The local facilitator: protocol routing in front of verification and
//! settlement.
//!
//! Incoming envelopes are validated for internal consistency (protocol
//! version, scheme, network) before anything touches the network. Network
//! strings are already normalized at deserialization time, so the
//! payload/requirements comparison here is plain enum equality after both
//! legacy and CAIP-2 spellings collapsed to the same key. `exact` dispatches
//! to the verifier and the settlement engine; `deferred` is advertised per
//! chain when an escrow deployment is configured, but its execution path
//! lives outside this service.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::{Facilitator, PaymentError};
use crate::networks::Network;
use crate::provider_cache::ProviderMap;
use crate::settlement::SettlementEngine;
use crate::types::{
    Scheme, SettleRequest, SettleResponse, SupportedPaymentKind, SupportedResponse, VerifyRequest,
    VerifyResponse, X402Version,
};
use crate::verify;

/// Facilitator implementation dispatching to the settlement engine.
pub struct FacilitatorLocal {
    chains: Arc<dyn ProviderMap>,
    engine: Arc<SettlementEngine>,
    escrow_networks: HashSet<Network>,
}

impl FacilitatorLocal {
    pub fn new(
        chains: Arc<dyn ProviderMap>,
        engine: Arc<SettlementEngine>,
        escrow_networks: HashSet<Network>,
    ) -> Self {
        Self {
            chains,
            engine,
            escrow_networks,
        }
    }

    /// Consistency checks between the envelope, the payload, and the
    /// requirements. Runs before any network I/O.
    fn route(request: &VerifyRequest) -> Result<(), PaymentError> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;

        if request.x402_version != payload.x402_version {
            return Err(PaymentError::IncompatibleVersion {
                envelope: request.x402_version,
                payload: payload.x402_version,
            });
        }
        if payload.scheme != requirements.scheme {
            return Err(PaymentError::IncompatibleScheme {
                payload: payload.scheme,
                requirements: requirements.scheme,
            });
        }
        if payload.network != requirements.network {
            return Err(PaymentError::IncompatibleNetwork {
                payload: payload.network,
                requirements: requirements.network,
            });
        }
        match payload.scheme {
            Scheme::Exact => Ok(()),
            Scheme::Deferred => Err(PaymentError::UnsupportedScheme(Scheme::Deferred)),
        }
    }
}

impl Facilitator for FacilitatorLocal {
    /// Verifies a proposed x402 payment payload against the declared
    /// requirements. Payment rejections come back as `Ok` responses carrying
    /// the verdict; `Err` is reserved for conditions unrelated to the payment.
    #[instrument(skip_all, err, fields(
        network = %request.payment_payload.network,
        chain_id = %request.payment_payload.network.chain_id(),
    ))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, PaymentError> {
        let payload = &request.payment_payload;
        let payer = payload.payload.authorization.from;

        if let Err(e) = Self::route(request) {
            tracing::warn!(error = %e, "verification rejected by router");
            return Ok(VerifyResponse::invalid(e.reason(), Some(payer)));
        }
        let Some(chain) = self.chains.by_network(payload.network) else {
            let e = PaymentError::UnsupportedNetwork(payload.network);
            return Ok(VerifyResponse::invalid(e.reason(), Some(payer)));
        };
        match verify::assert_valid_payment(chain.as_ref(), payload, &request.payment_requirements)
            .await
        {
            Ok(payer) => Ok(VerifyResponse::valid(payer)),
            Err(e) if e.is_payment_verdict() => {
                tracing::warn!(error = %e, "verification failed");
                Ok(VerifyResponse::invalid(e.reason(), Some(payer)))
            }
            Err(e) => Err(e),
        }
    }

    /// Executes an x402 settlement through the settlement engine.
    #[instrument(skip_all, err, fields(
        network = %request.payment_payload.network,
        chain_id = %request.payment_payload.network.chain_id(),
    ))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, PaymentError> {
        let payload = &request.payment_payload;
        let payer = payload.payload.authorization.from;

        if let Err(e) = Self::route(request) {
            tracing::warn!(error = %e, "settlement rejected by router");
            return Ok(SettleResponse {
                success: false,
                error_reason: Some(e.reason()),
                payer,
                transaction: None,
                network: payload.network,
            });
        }
        Ok(self.engine.settle(request).await)
    }

    /// Payment kinds this facilitator can handle: `exact` on every configured
    /// chain for both protocol versions, `deferred` only where an escrow
    /// deployment exists.
    async fn supported(&self) -> Result<SupportedResponse, PaymentError> {
        let mut kinds = Vec::new();
        for network in self.chains.networks() {
            kinds.push(SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network,
            });
            kinds.push(SupportedPaymentKind {
                x402_version: X402Version::V2,
                scheme: Scheme::Exact,
                network,
            });
            if self.escrow_networks.contains(&network) {
                kinds.push(SupportedPaymentKind {
                    x402_version: X402Version::V2,
                    scheme: Scheme::Deferred,
                    network,
                });
            }
        }
        Ok(SupportedResponse { kinds })
    }
}
