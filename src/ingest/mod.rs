// src/ingest/mod.rs
pub mod connector;
pub mod converter;
pub mod sink;
pub mod transport;
pub mod types;

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::config::ConnectorConfig;
use crate::ingest::transport::{HttpTransport, PollRequest};
use crate::ingest::types::{Converter, StorageSink};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("connector_polls_total", "Poll requests issued.");
        describe_counter!(
            "connector_poll_errors_total",
            "Polls abandoned because of transport, decode or sink errors."
        );
        describe_counter!(
            "connector_http_errors_total",
            "Polls answered with a non-200 status."
        );
        describe_counter!(
            "connector_records_forwarded_total",
            "Normalized records handed to the storage sink."
        );
        describe_counter!(
            "converter_failures_total",
            "Payloads dropped by the converter as malformed."
        );
        describe_histogram!("connector_poll_ms", "Poll round-trip time in milliseconds.");
        describe_gauge!(
            "connector_last_poll_ts",
            "Unix ts when the connector last polled."
        );
    });
}

/// What a single poll achieved when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Response converted; this many records reached the sink.
    Forwarded(usize),
    /// Upstream answered with something other than 200.
    Rejected { status: u16 },
    /// Response was fine but there is no converter to process it.
    NoConverter,
}

/// The parts of a connector one poll needs. Shared with the background task.
pub struct Poller {
    pub name: String,
    pub id: String,
    pub config: Arc<ConnectorConfig>,
    pub request: PollRequest,
    pub converter: Option<Arc<dyn Converter>>,
    pub transport: Arc<dyn HttpTransport>,
    pub sink: Arc<dyn StorageSink>,
}

/// Run one request → convert → forward cycle.
pub async fn poll_once(p: &Poller) -> Result<PollOutcome> {
    ensure_metrics_described();
    let t0 = std::time::Instant::now();
    counter!("connector_polls_total", "connector" => p.name.clone()).increment(1);
    gauge!("connector_last_poll_ts", "connector" => p.name.clone())
        .set(chrono::Utc::now().timestamp().max(0) as f64);

    let resp = p.transport.execute(&p.request).await?;
    histogram!("connector_poll_ms", "connector" => p.name.clone())
        .record(t0.elapsed().as_secs_f64() * 1_000.0);

    if resp.status != 200 {
        tracing::warn!(connector = %p.name, status = resp.status, "HTTP error from upstream");
        counter!("connector_http_errors_total", "connector" => p.name.clone()).increment(1);
        return Ok(PollOutcome::Rejected {
            status: resp.status,
        });
    }

    let body: serde_json::Value =
        serde_json::from_str(&resp.body).context("decoding response body as JSON")?;

    let Some(converter) = &p.converter else {
        tracing::warn!(connector = %p.name, "no converter configured, response dropped");
        return Ok(PollOutcome::NoConverter);
    };

    let records = converter.convert(&p.config, &body);
    for rec in &records {
        p.sink
            .send(&p.name, &p.id, rec)
            .await
            .with_context(|| format!("forwarding {} to storage", rec.device_name))?;
        counter!("connector_records_forwarded_total", "connector" => p.name.clone()).increment(1);
    }

    tracing::debug!(connector = %p.name, records = records.len(), "poll forwarded");
    Ok(PollOutcome::Forwarded(records.len()))
}
