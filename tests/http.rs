//! HTTP boundary tests: gate rejections, standard headers, and capability
//! discovery, exercised through the real router with in-memory stores.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;

use x402_sponsor::chain::ChainOps;
use x402_sponsor::facilitator_local::FacilitatorLocal;
use x402_sponsor::gate::{Gate, StaticTierDirectory, SubscriptionTier};
use x402_sponsor::handlers::{self, AppState};
use x402_sponsor::ledger::MemoryLedger;
use x402_sponsor::networks::Network;
use x402_sponsor::oracle::HttpSignerOracle;
use x402_sponsor::provider_cache::ProviderMap;
use x402_sponsor::settlement::{SettlementConfig, SettlementEngine};
use x402_sponsor::sponsor::{MemorySponsorDirectory, SponsorDirectory};
use x402_sponsor::trace_id;

/// A provider map with no reachable chains: requests must be decided before
/// any chain I/O for these tests to pass.
struct NoChains;

impl ProviderMap for NoChains {
    fn by_network(&self, _network: Network) -> Option<Arc<dyn ChainOps>> {
        None
    }

    fn networks(&self) -> Vec<Network> {
        vec![Network::BaseSepolia]
    }
}

fn app(tier: SubscriptionTier, escrow: bool) -> axum::Router {
    let chains = Arc::new(NoChains);
    let gate = Arc::new(Gate::new(Arc::new(StaticTierDirectory::new(tier))));
    let oracle = Arc::new(HttpSignerOracle::new(
        "http://localhost:9".parse().unwrap(),
        "test-key".into(),
        std::time::Duration::from_secs(1),
    ));
    let engine = Arc::new(SettlementEngine::new(
        chains.clone(),
        oracle,
        Arc::new(MemorySponsorDirectory::new()) as Arc<dyn SponsorDirectory>,
        Arc::new(MemoryLedger::new()),
        gate.clone(),
        SettlementConfig::default(),
    ));
    let escrow_networks: HashSet<Network> = if escrow {
        [Network::BaseSepolia].into()
    } else {
        HashSet::new()
    };
    let facilitator = Arc::new(FacilitatorLocal::new(chains, engine, escrow_networks));
    axum::Router::new()
        .merge(handlers::routes())
        .with_state(AppState { facilitator, gate })
        .layer(axum::middleware::from_fn(trace_id::request_id))
}

fn settle_body() -> Value {
    json!({
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
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn settle_with_exhausted_quota_returns_402_without_verification() {
    let tier = SubscriptionTier {
        name: "free".into(),
        rate_limit: 60,
        monthly_tx_limit: 0,
    };
    let app = app(tier, false);

    let response = app.oneshot(post("/settle", &settle_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(response.headers().contains_key("X-x402-Request-Id"));
    assert_eq!(response.headers()["X-x402-Chain-Id"], "84532");
    let body = body_json(response).await;
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["used"], 0);
    assert_eq!(body["limit"], 0);
    assert!(body["periodEnd"].is_string());
    assert_eq!(body["accepts"][0]["network"], "base-sepolia");
    assert_eq!(body["accepts"][0]["maxAmountRequired"], "1000000");
}

#[tokio::test]
async fn second_request_in_window_is_rate_limited() {
    let tier = SubscriptionTier {
        name: "free".into(),
        rate_limit: 1,
        monthly_tx_limit: -1,
    };
    let app = app(tier, false);

    let first = app
        .clone()
        .oneshot(post("/verify", &settle_body()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["X-RateLimit-Remaining"], "0");

    let second = app.oneshot(post("/verify", &settle_body())).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("Retry-After"));
    let body = body_json(second).await;
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn verify_on_unconfigured_network_is_invalid_not_500() {
    let app = app(SubscriptionTier::free(), false);

    let response = app.oneshot(post("/verify", &settle_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["X-x402-Version"], handlers::X402_VERSION);
    assert_eq!(response.headers()["X-x402-Network"], "base-sepolia");
    assert_eq!(response.headers()["X-x402-CAIP2"], "eip155:84532");
    let body = body_json(response).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["invalidReason"], "network_mismatch");
}

#[tokio::test]
async fn supported_lists_deferred_only_with_escrow() {
    let without = app(SubscriptionTier::free(), false);
    let response = without
        .oneshot(Request::get("/supported").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let kinds = body["kinds"].as_array().unwrap();
    assert!(kinds.iter().all(|k| k["scheme"] != "deferred"));
    assert!(kinds.iter().any(|k| {
        k["scheme"] == "exact" && k["network"] == "base-sepolia" && k["x402Version"] == 2
    }));

    let with = app(SubscriptionTier::free(), true);
    let response = with
        .oneshot(Request::get("/supported").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    let kinds = body["kinds"].as_array().unwrap();
    assert!(kinds.iter().any(|k| {
        k["scheme"] == "deferred" && k["network"] == "base-sepolia" && k["x402Version"] == 2
    }));
}

#[tokio::test]
async fn version_mismatch_between_envelope_and_payload_is_rejected() {
    let app = app(SubscriptionTier::free(), false);
    let mut body = settle_body();
    body["x402Version"] = json!(1);

    let response = app.oneshot(post("/verify", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["invalidReason"], "invalid_authorization");
}
