//! Logging and telemetry bootstrap.
//!
//! Logging always runs: an env-filtered `tracing` fmt subscriber. When an
//! OTLP endpoint is configured via the standard `OTEL_EXPORTER_OTLP_*`
//! variables, the same subscriber additionally exports spans and metrics, so
//! the verify / submit / reconcile spans of a settlement line up end-to-end
//! in a trace viewer. Exported resources are tagged with this service's
//! role so facilitator traffic is separable from the other x402 components
//! sharing a collector.

use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use opentelemetry_semantic_conventions::attribute::{
    DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION,
};
use std::env;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Transport for OTLP export. `http/protobuf` unless `grpc` is requested.
#[derive(Debug, Clone, Copy)]
enum OtlpProtocol {
    Http,
    Grpc,
}

impl OtlpProtocol {
    /// `Some` when any standard OTLP variable is present.
    fn from_env() -> Option<Self> {
        let configured = [
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "OTEL_EXPORTER_OTLP_HEADERS",
            "OTEL_EXPORTER_OTLP_PROTOCOL",
        ]
        .iter()
        .any(|var| env::var(var).is_ok());
        if !configured {
            return None;
        }
        match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => Some(OtlpProtocol::Grpc),
            _ => Some(OtlpProtocol::Http),
        }
    }
}

/// The resource identity attached to every exported span and metric.
fn resource() -> Resource {
    let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_schema_url(
            [
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                KeyValue::new("x402.role", "facilitator"),
                KeyValue::new("x402.settlement.gas", "sponsored"),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

/// Holds the export providers for graceful flush on shutdown.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Install the global subscriber, with OTLP export when configured.
    pub fn init() -> Self {
        let Some(protocol) = OtlpProtocol::from_env() else {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .init();
            tracing::info!("OpenTelemetry export is not configured");
            return Self {
                tracer_provider: None,
                meter_provider: None,
            };
        };

        let span_exporter = match protocol {
            OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .build(),
            OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build(),
        }
        .expect("Failed to build OTLP span exporter");
        let tracer_provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(span_exporter)
            .build();

        let metric_exporter = match protocol {
            OtlpProtocol::Http => opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .build(),
            OtlpProtocol::Grpc => opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .build(),
        }
        .expect("Failed to build OTLP metric exporter");
        let meter_provider = MeterProviderBuilder::default()
            .with_resource(resource())
            .with_reader(
                PeriodicReader::builder(metric_exporter)
                    .with_interval(std::time::Duration::from_secs(30))
                    .build(),
            )
            .build();
        global::set_meter_provider(meter_provider.clone());

        let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(MetricsLayer::new(meter_provider.clone()))
            .with(OpenTelemetryLayer::new(tracer))
            .init();

        tracing::info!(protocol = ?protocol, "OpenTelemetry export enabled");
        Self {
            tracer_provider: Some(tracer_provider),
            meter_provider: Some(meter_provider),
        }
    }
}

/// Flush exporters on shutdown.
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
        if let Some(meter_provider) = self.meter_provider.as_ref() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}
