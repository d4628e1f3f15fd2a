// src/config/connector.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_CONNECTOR_NAME: &str = "RestConnector";
pub const DEFAULT_CONNECTOR_ID: &str = "default_id";
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_CONVERTER_EXTENSION: &str = "rest";
pub const DEFAULT_CONVERTER_CLASS: &str = "TagValuesConverter";

fn default_name() -> String {
    DEFAULT_CONNECTOR_NAME.to_string()
}
fn default_id() -> String {
    DEFAULT_CONNECTOR_ID.to_string()
}
fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}
fn default_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// HTTP verb used for every poll. Input is case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl From<String> for HttpMethod {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "GET" => Self::Get,
            other => {
                // Anything that is not POST has always been polled with GET.
                tracing::warn!(method = other, "unsupported httpMethod, falling back to GET");
                Self::Get
            }
        }
    }
}

impl From<HttpMethod> for &'static str {
    fn from(m: HttpMethod) -> Self {
        m.as_str()
    }
}

/// Which converter implementation the connector should build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterSpec {
    #[serde(default = "ConverterSpec::default_extension")]
    pub extension: String,
    #[serde(default = "ConverterSpec::default_class")]
    pub class: String,
}

impl ConverterSpec {
    fn default_extension() -> String {
        DEFAULT_CONVERTER_EXTENSION.to_string()
    }
    fn default_class() -> String {
        DEFAULT_CONVERTER_CLASS.to_string()
    }
}

impl Default for ConverterSpec {
    fn default() -> Self {
        Self {
            extension: Self::default_extension(),
            class: Self::default_class(),
        }
    }
}

/// What to do when the configured converter cannot be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterErrorPolicy {
    /// Log the failure and keep polling without a converter (nothing is forwarded).
    #[default]
    Ignore,
    /// Refuse to construct the connector.
    Fail,
}

/// Connector configuration as supplied by the host gateway.
///
/// Unknown keys are preserved in `extra` so converters can read their own settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_id")]
    pub id: String,
    /// Not validated here; a missing URL shows up as a failed poll.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_body")]
    pub body: serde_json::Value,
    /// Milliseconds between polls.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default)]
    pub converter: ConverterSpec,
    #[serde(default)]
    pub on_converter_error: ConverterErrorPolicy,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            id: default_id(),
            url: None,
            http_method: HttpMethod::default(),
            headers: BTreeMap::new(),
            body: default_body(),
            polling_interval: default_polling_interval(),
            converter: ConverterSpec::default(),
            on_converter_error: ConverterErrorPolicy::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl ConnectorConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing connector config JSON")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading connector config from {}", path.display()))?;
        Self::from_json_str(&data).with_context(|| format!("in {}", path.display()))
    }

    /// `pollingInterval` converted from milliseconds to a seconds-based duration.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_interval as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gets_all_defaults() {
        let cfg = ConnectorConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.name, DEFAULT_CONNECTOR_NAME);
        assert_eq!(cfg.id, DEFAULT_CONNECTOR_ID);
        assert_eq!(cfg.url, None);
        assert_eq!(cfg.http_method, HttpMethod::Post);
        assert!(cfg.headers.is_empty());
        assert_eq!(cfg.body, serde_json::json!({}));
        assert_eq!(cfg.polling_interval(), Duration::from_secs(60));
        assert_eq!(cfg.converter, ConverterSpec::default());
        assert_eq!(cfg.on_converter_error, ConverterErrorPolicy::Ignore);
    }

    #[test]
    fn method_is_case_insensitive() {
        let cfg = ConnectorConfig::from_json_str(r#"{"httpMethod":"get"}"#).unwrap();
        assert_eq!(cfg.http_method, HttpMethod::Get);
        let cfg = ConnectorConfig::from_json_str(r#"{"httpMethod":"Post"}"#).unwrap();
        assert_eq!(cfg.http_method, HttpMethod::Post);
        let cfg = ConnectorConfig::from_json_str(r#"{"httpMethod":"PATCH"}"#).unwrap();
        assert_eq!(cfg.http_method, HttpMethod::Get);
    }

    #[test]
    fn one_second_interval_is_one_point_zero_secs() {
        let cfg = ConnectorConfig::from_json_str(r#"{"pollingInterval":1000}"#).unwrap();
        assert_eq!(cfg.polling_interval().as_secs_f64(), 1.0);
        let cfg = ConnectorConfig::from_json_str(r#"{"pollingInterval":250}"#).unwrap();
        assert_eq!(cfg.polling_interval().as_secs_f64(), 0.25);
    }

    #[test]
    fn full_config_round_trips_known_and_extra_keys() {
        let raw = r#"{
            "name": "Boiler",
            "id": "b-1",
            "url": "http://plc.local/api/tags",
            "httpMethod": "POST",
            "headers": {"Authorization": "Bearer x"},
            "body": {"Tags": ["T1", "T2"]},
            "pollingInterval": 5000,
            "converter": {"extension": "rest", "class": "TagValuesConverter"},
            "onConverterError": "fail",
            "site": "north"
        }"#;
        let cfg = ConnectorConfig::from_json_str(raw).unwrap();
        assert_eq!(cfg.name, "Boiler");
        assert_eq!(cfg.url.as_deref(), Some("http://plc.local/api/tags"));
        assert_eq!(cfg.headers.get("Authorization").map(String::as_str), Some("Bearer x"));
        assert_eq!(cfg.on_converter_error, ConverterErrorPolicy::Fail);
        assert_eq!(cfg.extra.get("site"), Some(&serde_json::json!("north")));

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["httpMethod"], "POST");
        assert_eq!(back["pollingInterval"], 5000);
        assert_eq!(back["site"], "north");
    }

    #[test]
    fn missing_file_is_an_error_with_path() {
        let err = ConnectorConfig::load_from_file("does/not/exist.json").unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.json"));
    }
}
