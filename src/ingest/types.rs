// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::ConnectorConfig;

pub const DEFAULT_DEVICE_TYPE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryValues {
    pub value: f64,
    pub quality: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEntry {
    pub ts: i64, // unix millis
    pub values: TelemetryValues,
}

/// Vendor-neutral telemetry envelope, one per upstream tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub device_name: String,
    pub device_type: String,
    pub telemetry: Vec<TelemetryEntry>,
    pub attributes: Vec<serde_json::Value>,
}

impl NormalizedRecord {
    pub fn single(device_name: String, ts: i64, value: f64, quality: i64) -> Self {
        Self {
            device_name,
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            telemetry: vec![TelemetryEntry {
                ts,
                values: TelemetryValues { value, quality },
            }],
            attributes: Vec::new(),
        }
    }
}

/// Maps one upstream document to zero or more records.
///
/// Implementations must not fail: malformed input yields an empty vector.
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `raw` is either the decoded document or a JSON string holding it.
    fn convert(&self, config: &ConnectorConfig, raw: &serde_json::Value) -> Vec<NormalizedRecord>;
}

/// Downstream storage collaborator owned by the host gateway.
#[async_trait::async_trait]
pub trait StorageSink: Send + Sync {
    async fn send(
        &self,
        connector_name: &str,
        connector_id: &str,
        record: &NormalizedRecord,
    ) -> Result<()>;
}
