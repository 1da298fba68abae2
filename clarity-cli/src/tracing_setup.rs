//! Logging for the clarity CLI.
//!
//! Everything goes to stderr; stdout carries only artifact paths and markdown.
//! `RUST_LOG` overrides the default level (`warn`, or `debug` with `--debug`).
//! Built with the `telemetry` feature, `--otel` additionally exports spans
//! over OTLP to `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4317`).

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub debug: bool,
    pub otel: bool,
}

impl TracingConfig {
    fn filter(&self) -> EnvFilter {
        let default = if self.debug { "debug" } else { "warn" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}

pub fn init(config: &TracingConfig) -> Result<()> {
    let console = fmt::layer()
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(config.filter())
        .with(console)
        .with(otlp_layer(config)?)
        .try_init()
        .context("tracing subscriber already installed")
}

#[cfg(feature = "telemetry")]
fn otlp_layer<S>(config: &TracingConfig) -> Result<Option<impl tracing_subscriber::Layer<S>>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    if !config.otel {
        return Ok(None);
    }

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .with_context(|| format!("failed to create OTLP exporter for {endpoint}"))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new([KeyValue::new("service.name", "clarity")]))
        .build();
    let tracer = provider.tracer("clarity");
    // The global slot keeps the provider alive until shutdown_otel.
    let _ = opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

#[cfg(not(feature = "telemetry"))]
fn otlp_layer(_config: &TracingConfig) -> Result<Option<tracing_subscriber::layer::Identity>> {
    Ok(None)
}

/// Flush spans still queued for export.
pub fn shutdown_otel() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
