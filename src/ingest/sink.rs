// src/ingest/sink.rs
use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::ingest::types::{NormalizedRecord, StorageSink};

/// Writes each record to the process log. Default sink of the binary.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait::async_trait]
impl StorageSink for LogSink {
    async fn send(&self, connector_name: &str, connector_id: &str, record: &NormalizedRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("serializing record")?;
        tracing::info!(
            target: "storage",
            connector = connector_name,
            connector_id,
            device = %record.device_name,
            record = %json,
            "telemetry"
        );
        Ok(())
    }
}

/// One forwarded record together with its routing keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRecord {
    pub connector_name: String,
    pub connector_id: String,
    pub record: NormalizedRecord,
}

/// Hands records to an in-process consumer (e.g. the host gateway's storage loop).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RoutedRecord>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RoutedRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl StorageSink for ChannelSink {
    async fn send(&self, connector_name: &str, connector_id: &str, record: &NormalizedRecord) -> Result<()> {
        self.tx
            .send(RoutedRecord {
                connector_name: connector_name.to_string(),
                connector_id: connector_id.to_string(),
                record: record.clone(),
            })
            .await
            .context("storage channel closed")
    }
}

// --- Test helper ---
pub struct MockSink {
    pub calls: std::sync::Mutex<Vec<RoutedRecord>>,
    /// Fail every send after this many successful ones.
    pub fail_after: Option<usize>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            fail_after: None,
        }
    }

    pub fn failing_after(n: usize) -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            fail_after: Some(n),
        }
    }

    pub fn device_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|r| r.record.device_name.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageSink for MockSink {
    async fn send(&self, connector_name: &str, connector_id: &str, record: &NormalizedRecord) -> Result<()> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| anyhow::anyhow!("mock sink mutex poisoned"))?;
        if self.fail_after.is_some_and(|n| calls.len() >= n) {
            anyhow::bail!("mock sink refused record {}", record.device_name);
        }
        calls.push(RoutedRecord {
            connector_name: connector_name.to_string(),
            connector_id: connector_id.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}
