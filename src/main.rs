//! REST polling connector binary.
//! Loads the connector config, wires logging/metrics, and polls until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use rest_telemetry_connector::config::{LogFormat, RuntimeSettings};
use rest_telemetry_connector::ingest::sink::LogSink;
use rest_telemetry_connector::ingest::transport::ReqwestTransport;
use rest_telemetry_connector::logfile::{file_layer, HandlerRegistry, SharedHandler};
use rest_telemetry_connector::metrics::Metrics;
use rest_telemetry_connector::{ConnectorConfig, ConverterRegistry, RestConnector};

/// Console layer plus, when a file handler is given, a second layer into it.
fn init_tracing(format: LogFormat, file: Option<SharedHandler>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = file.and_then(|h| match file_layer::<Registry>(h) {
        Ok(layer) => Some(layer),
        Err(e) => {
            eprintln!("connector log file disabled: {e:#}");
            None
        }
    });
    let registry = tracing_subscriber::registry().with(file).with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let settings = RuntimeSettings::from_env()?;
    let config = ConnectorConfig::load_from_file(&settings.connector_config_path)?;

    // Per-connector log file, named after the connector.
    let handlers = HandlerRegistry::from_env()?;
    let file_handler = match handlers.connector_file_handler(&config.name) {
        Ok(h) => Some(h),
        Err(e) => {
            eprintln!("connector log file disabled: {e:#}");
            None
        }
    };
    init_tracing(settings.log_format, file_handler);

    let metrics = Metrics::init()?;
    let listener = tokio::net::TcpListener::bind(settings.metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {}", settings.metrics_addr))?;
    let app = metrics.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = ?e, "metrics server stopped");
        }
    });
    info!(addr = %settings.metrics_addr, "metrics exposed on /metrics");

    let connector = RestConnector::new(
        config,
        &ConverterRegistry::with_defaults(),
        Arc::new(ReqwestTransport::new()),
        Arc::new(LogSink),
    )?;
    connector.open()?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!(connector = connector.name(), "shutdown requested");
    connector.close();
    connector.join().await;
    Ok(())
}
