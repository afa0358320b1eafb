//! Facilitator HTTP entrypoint.
//!
//! Launches an Axum-based HTTP server exposing the x402 protocol interface
//! for payment verification and settlement across the configured EVM
//! networks.
//!
//! Endpoints:
//! - `POST /verify` – Verify a payment payload against requirements
//! - `POST /settle` – Settle an accepted payment payload on-chain
//! - `GET /supported` – List supported payment kinds (version/scheme/network)
//! - `GET /verify`, `GET /settle`, `GET /health`, `GET /` – discovery
//!
//! This server includes:
//! - OpenTelemetry tracing via `tracing` + OTLP when configured
//! - CORS support for cross-origin clients
//! - A chain provider cache for per-network RPC routing
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `OTEL_*` variables enable tracing export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_sponsor::config::Config;
use x402_sponsor::facilitator_local::FacilitatorLocal;
use x402_sponsor::gate::{Gate, PgTierDirectory, StaticTierDirectory, SubscriptionTier};
use x402_sponsor::gate::TierDirectory;
use x402_sponsor::handlers::{self, AppState};
use x402_sponsor::ledger::{Ledger, NullLedger, PgLedger};
use x402_sponsor::oracle::HttpSignerOracle;
use x402_sponsor::provider_cache::ProviderCache;
use x402_sponsor::settlement::{SettlementConfig, SettlementEngine};
use x402_sponsor::sig_down::SigDown;
use x402_sponsor::sponsor::{MemorySponsorDirectory, PgSponsorDirectory, SponsorDirectory};
use x402_sponsor::telemetry::Telemetry;
use x402_sponsor::trace_id;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::init();

    let config = Config::from_env()?;

    let chains = Arc::new(ProviderCache::from_config(&config).await?);

    let pool = match &config.database_url {
        Some(url) => Some(
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?,
        ),
        None => {
            tracing::warn!("No DATABASE_URL configured: using in-memory stores");
            None
        }
    };

    let sponsors: Arc<dyn SponsorDirectory> = match &pool {
        Some(pool) => Arc::new(PgSponsorDirectory::new(pool.clone())),
        None => Arc::new(MemorySponsorDirectory::new()),
    };
    let tiers: Arc<dyn TierDirectory> = match &pool {
        Some(pool) => Arc::new(PgTierDirectory::new(pool.clone())),
        None => Arc::new(StaticTierDirectory::new(SubscriptionTier::free())),
    };
    let ledger: Arc<dyn Ledger> = match &pool {
        Some(pool) => Arc::new(PgLedger::new(pool.clone())),
        None => Arc::new(NullLedger),
    };

    let gate = Arc::new(Gate::new(tiers));
    let _sweeper = gate.spawn_sweeper(Duration::from_secs(300));

    let oracle = Arc::new(HttpSignerOracle::new(
        config.oracle_url.clone(),
        config.oracle_api_key.clone(),
        config.oracle_timeout,
    ));

    let engine = Arc::new(SettlementEngine::new(
        chains.clone(),
        oracle,
        sponsors,
        ledger,
        gate.clone(),
        SettlementConfig {
            log_scan_seconds: config.log_scan_seconds,
            receipt_timeout_max: config.receipt_timeout_max,
            ..SettlementConfig::default()
        },
    ));

    let escrow_networks: HashSet<_> = config.escrow_addresses.keys().copied().collect();
    let facilitator = Arc::new(FacilitatorLocal::new(chains, engine, escrow_networks));

    let state = AppState {
        facilitator,
        gate,
    };
    let http_endpoints = Router::new()
        .merge(handlers::routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(trace_id::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
