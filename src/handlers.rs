//! HTTP endpoints implemented by the facilitator.
//!
//! Protocol-critical endpoints (`POST /verify`, `POST /settle`) plus the
//! discovery endpoints (`GET /supported`, `GET /verify`, `GET /settle`,
//! `GET /health`). Every response carries the standard `X-x402-*` headers;
//! settle responses are V2 receipts. The per-minute rate gate fronts both
//! POST endpoints, and the monthly quota gate fronts settlement before any
//! verification work happens.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocal;
use crate::gate::{Gate, RateDecision};
use crate::networks::Network;
use crate::trace_id::RequestId;
use crate::types::{
    ErrorReason, ErrorResponse, PaymentRequiredBody, ReceiptNetwork, ReceiptPayment,
    ReceiptSettlement, Scheme, SettleReceipt, SettleRequest, SettleResponse, VerifyRequest,
};

/// Protocol version advertised in the `X-x402-Version` header and receipts.
pub const X402_VERSION: &str = "2.0.0";

/// Shared state of the HTTP boundary.
#[derive(Clone)]
pub struct AppState {
    pub facilitator: Arc<FacilitatorLocal>,
    pub gate: Arc<Gate>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle))
        .route("/health", get(get_health))
        .route("/supported", get(get_supported))
}

/// `GET /`: Returns a simple greeting message from the facilitator.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "x402Version": "1 | 2",
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "x402Version": "1 | 2",
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: payment kinds this facilitator accepts.
#[instrument(skip_all)]
pub async fn get_supported(State(state): State<AppState>) -> Response {
    match state.facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => internal_error(error).into_response(),
    }
}

#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> Response {
    get_supported(State(state)).await
}

/// `POST /verify`: facilitator-side verification of a proposed x402 payment.
///
/// Both valid and invalid verdicts return `200`; the body carries the result.
#[instrument(skip_all)]
pub async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Response {
    let payer = body.payment_payload.payload.authorization.from;
    let rate = state.gate.check_rate(&payer.to_string(), Some(payer)).await;
    let mut headers = x402_headers(body.payment_payload.network, body.payment_payload.scheme);
    rate_headers(&mut headers, &rate);
    if !rate.allowed {
        return rate_limited(headers, &rate);
    }

    match state.facilitator.verify(&body).await {
        Ok(verdict) => (StatusCode::OK, headers, Json(verdict)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "verification errored");
            internal_error(error).into_response()
        }
    }
}

/// `POST /settle`: facilitator-side execution of an x402 payment on-chain.
///
/// Returns `200` with a V2 receipt for terminal outcomes; `402` only when the
/// quota gate rejects before settlement, `429` when the rate gate does.
#[instrument(skip_all)]
pub async fn post_settle(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<SettleRequest>,
) -> Response {
    let payer = body.payment_payload.payload.authorization.from;
    let rate = state.gate.check_rate(&payer.to_string(), Some(payer)).await;
    let mut headers = x402_headers(body.payment_payload.network, body.payment_payload.scheme);
    rate_headers(&mut headers, &rate);
    if !rate.allowed {
        return rate_limited(headers, &rate);
    }

    // Budget check happens before any verification work; consumption happens
    // inside the engine once the payment verifies.
    let quota = state.gate.check_quota(payer).await;
    if !quota.allowed {
        let rejection = PaymentRequiredBody {
            error: ErrorReason::QuotaExceeded,
            used: quota.used,
            limit: quota.limit,
            period_end: quota.period_end,
            accepts: vec![body.payment_requirements.clone()],
        };
        return (StatusCode::PAYMENT_REQUIRED, headers, Json(rejection)).into_response();
    }

    match state.facilitator.settle(&body).await {
        Ok(outcome) => {
            if let Some(transaction) = &outcome.transaction {
                if let Ok(value) = HeaderValue::from_str(&transaction.to_string()) {
                    headers.insert("X-x402-Transaction", value);
                }
            }
            let receipt = settle_receipt(&request_id, &body, &outcome);
            (StatusCode::OK, headers, Json(receipt)).into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "settlement errored");
            internal_error(error).into_response()
        }
    }
}

/// The standard header set attached to every x402 response. The request id
/// header is stamped by the [`crate::trace_id`] middleware.
fn x402_headers(network: Network, scheme: Scheme) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-x402-Version", HeaderValue::from_static(X402_VERSION));
    if let Ok(value) = HeaderValue::from_str(network.name()) {
        headers.insert("X-x402-Network", value);
    }
    if let Ok(value) = HeaderValue::from_str(&network.chain_id().to_string()) {
        headers.insert("X-x402-Chain-Id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&network.caip2().to_string()) {
        headers.insert("X-x402-CAIP2", value);
    }
    if let Ok(value) = HeaderValue::from_str(&scheme.to_string()) {
        headers.insert("X-x402-Scheme", value);
    }
    headers
}

fn rate_headers(headers: &mut HeaderMap, rate: &RateDecision) {
    if let Ok(value) = HeaderValue::from_str(&rate.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&rate.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&rate.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

fn rate_limited(mut headers: HeaderMap, rate: &RateDecision) -> Response {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let retry_after = rate.reset_at.saturating_sub(now).max(1);
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        headers.insert("Retry-After", value);
    }
    let body = ErrorResponse {
        error: ErrorReason::RateLimited.to_string(),
    };
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

fn internal_error(error: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Assemble the V2 receipt for a settlement outcome.
fn settle_receipt(
    request_id: &str,
    request: &SettleRequest,
    outcome: &SettleResponse,
) -> SettleReceipt {
    let network = request.payment_payload.network;
    let block_explorer = outcome
        .transaction
        .as_ref()
        .map(|tx| network.explorer_tx_url(&tx.to_string()));
    SettleReceipt {
        version: X402_VERSION.to_string(),
        request_id: request_id.to_string(),
        timestamp: chrono::Utc::now(),
        network: ReceiptNetwork::from(network),
        payment: ReceiptPayment {
            scheme: request.payment_payload.scheme,
            payer: outcome.payer,
            amount: request.payment_payload.payload.authorization.value,
            asset: request.payment_requirements.asset,
        },
        settlement: ReceiptSettlement {
            success: outcome.success,
            transaction: outcome.transaction,
            block_explorer,
            error_reason: outcome.error_reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenAmount, TransactionHash};

    fn settle_request() -> SettleRequest {
        serde_json::from_value(json!({
            "x402Version": 2,
            "paymentPayload": {
                "x402Version": 2,
                "scheme": "exact",
                "network": "base-sepolia",
                "payload": {
                    "signature": format!("0x{}", "11".repeat(64) + "1b"),
                    "authorization": {
                        "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                        "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                        "value": "1000000",
                        "validAfter": "0",
                        "validBefore": "9999999999",
                        "nonce": format!("0x{}", "22".repeat(32)),
                    }
                }
            },
            "paymentRequirements": {
                "scheme": "exact",
                "network": "base-sepolia",
                "maxAmountRequired": "1000000",
                "resource": "https://api.example.com/v1/reports",
                "payTo": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "maxTimeoutSeconds": 60,
                "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_x402_headers_cover_network_identity() {
        let headers = x402_headers(Network::BaseSepolia, Scheme::Exact);
        assert_eq!(headers.get("X-x402-Version").unwrap(), X402_VERSION);
        assert_eq!(headers.get("X-x402-Network").unwrap(), "base-sepolia");
        assert_eq!(headers.get("X-x402-Chain-Id").unwrap(), "84532");
        assert_eq!(headers.get("X-x402-CAIP2").unwrap(), "eip155:84532");
        assert_eq!(headers.get("X-x402-Scheme").unwrap(), "exact");
    }

    #[test]
    fn test_receipt_carries_explorer_url_and_amount() {
        let request = settle_request();
        let outcome = SettleResponse {
            success: true,
            error_reason: None,
            payer: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap(),
            transaction: Some(TransactionHash([0xde; 32])),
            network: Network::BaseSepolia,
        };
        let receipt = settle_receipt("req-7", &request, &outcome);
        assert_eq!(receipt.version, X402_VERSION);
        assert_eq!(receipt.request_id, "req-7");
        assert_eq!(receipt.network.chain_id, 84532);
        assert_eq!(receipt.payment.amount, TokenAmount::from(1_000_000u64));
        assert!(receipt.settlement.success);
        let explorer = receipt.settlement.block_explorer.unwrap();
        assert!(explorer.starts_with("https://sepolia.basescan.org/tx/0xde"));
    }

    #[test]
    fn test_receipt_with_null_transaction_has_no_explorer_link() {
        let request = settle_request();
        let outcome = SettleResponse {
            success: true,
            error_reason: None,
            payer: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap(),
            transaction: None,
            network: Network::BaseSepolia,
        };
        let receipt = settle_receipt("req-8", &request, &outcome);
        assert!(receipt.settlement.success);
        assert!(receipt.settlement.transaction.is_none());
        assert!(receipt.settlement.block_explorer.is_none());
    }
}
