// src/config/mod.rs
pub mod connector;

pub use connector::{ConnectorConfig, ConverterErrorPolicy, ConverterSpec, HttpMethod};

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const ENV_CONNECTOR_CONFIG_PATH: &str = "CONNECTOR_CONFIG_PATH";
pub const DEFAULT_CONNECTOR_CONFIG_PATH: &str = "config/rest_connector.json";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_METRICS_ADDR: &str = "METRICS_ADDR";
pub const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9898";

/// Output format of the process log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Process-level settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub connector_config_path: PathBuf,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self> {
        let connector_config_path = std::env::var(ENV_CONNECTOR_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONNECTOR_CONFIG_PATH));

        let log_format = match std::env::var(ENV_LOG_FORMAT) {
            Ok(v) => match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" | "" => LogFormat::Compact,
                other => return Err(anyhow!("invalid {ENV_LOG_FORMAT}: {other} (expected 'compact' or 'json')")),
            },
            Err(_) => LogFormat::Compact,
        };

        let raw_addr =
            std::env::var(ENV_METRICS_ADDR).unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = raw_addr
            .parse()
            .map_err(|e| anyhow!("invalid {ENV_METRICS_ADDR}: {e}"))?;

        Ok(Self {
            connector_config_path,
            log_format,
            metrics_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[serial_test::serial]
    #[test]
    fn defaults_when_env_is_empty() {
        env::remove_var(ENV_CONNECTOR_CONFIG_PATH);
        env::remove_var(ENV_LOG_FORMAT);
        env::remove_var(ENV_METRICS_ADDR);

        let s = RuntimeSettings::from_env().unwrap();
        assert_eq!(s.connector_config_path, PathBuf::from(DEFAULT_CONNECTOR_CONFIG_PATH));
        assert_eq!(s.log_format, LogFormat::Compact);
        assert_eq!(s.metrics_addr.to_string(), DEFAULT_METRICS_ADDR);
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_and_rejects_bad_values() {
        env::set_var(ENV_LOG_FORMAT, "JSON");
        env::set_var(ENV_METRICS_ADDR, "0.0.0.0:9000");
        let s = RuntimeSettings::from_env().unwrap();
        assert_eq!(s.log_format, LogFormat::Json);
        assert_eq!(s.metrics_addr.port(), 9000);

        env::set_var(ENV_LOG_FORMAT, "xml");
        assert!(RuntimeSettings::from_env().is_err());

        env::remove_var(ENV_LOG_FORMAT);
        env::set_var(ENV_METRICS_ADDR, "not-an-addr");
        assert!(RuntimeSettings::from_env().is_err());
        env::remove_var(ENV_METRICS_ADDR);
    }
}
