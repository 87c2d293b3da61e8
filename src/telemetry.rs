//! Process-wide logging and metrics export.
//!
//! `RUST_LOG` overrides `telemetry.log_level`. Query and store metrics are
//! exposed over HTTP only when built with the `prometheus` feature.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Install the log subscriber and, when configured, the metrics endpoint.
/// Call once, before the server starts.
pub fn init(config: &TelemetryConfig) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    if let Some(addr) = config.prometheus_addr {
        serve_metrics(addr)?;
    }

    Ok(())
}

#[cfg(feature = "prometheus")]
fn serve_metrics(addr: std::net::SocketAddr) -> Result<(), InitError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "serving cluster_dns metrics");
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn serve_metrics(addr: std::net::SocketAddr) -> Result<(), InitError> {
    tracing::warn!(%addr, "metrics endpoint requested, but built without the prometheus feature");
    Ok(())
}
