//! Tracing subscriber and Prometheus recorder set-up.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;
use crate::error::{Result, WorkerError};

/// Installs the global tracing subscriber. The filter comes from `RUST_LOG`
/// and defaults to `info`.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| WorkerError::Telemetry(e.to_string()))
}

/// Installs the Prometheus recorder with its own HTTP listener on `addr`.
pub fn install_metrics(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| WorkerError::Config(format!("METRICS_ADDR '{addr}' is not a socket address")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Telemetry(e.to_string()))?;

    tracing::info!(%addr, "Prometheus metrics listener started");
    Ok(())
}
