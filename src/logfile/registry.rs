// src/logfile/registry.rs
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, Layer};

use crate::config::LogFormat;
use crate::logfile::rotating::{RotatingFileHandler, RotationSettings};
use crate::logfile::{logs_dir_from_env, with_log_extension};

pub const CONNECTOR_LOGGER: &str = "connector";
pub const CONVERTER_LOGGER: &str = "converter";

/// Handler shared between the registry and whatever writes to it.
pub type SharedHandler = Arc<Mutex<RotatingFileHandler>>;

/// `MakeWriter` over a [`SharedHandler`] so a tracing `fmt` layer can log into it.
#[derive(Clone)]
pub struct HandlerWriter(pub SharedHandler);

impl io::Write for HandlerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log handler mutex poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log handler mutex poisoned"))?
            .flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for HandlerWriter {
    type Writer = HandlerWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// `fmt` layer writing into `handler`, formatted per the handler's own settings.
pub fn file_layer<S>(handler: SharedHandler) -> Result<Box<dyn Layer<S> + Send + Sync + 'static>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let format = handler
        .lock()
        .map_err(|_| anyhow!("log handler mutex poisoned"))?
        .settings()
        .format;
    let layer = fmt::layer().with_ansi(false).with_writer(HandlerWriter(handler));
    Ok(match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    })
}

/// Named file handlers, passed around explicitly instead of being looked up
/// through global logger state.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, SharedHandler>,
    logs_dir: Option<PathBuf>,
    /// Used when no base handler is registered for a logger.
    defaults: RotationSettings,
}

impl HandlerRegistry {
    pub fn new(logs_dir: Option<PathBuf>) -> Self {
        Self {
            handlers: HashMap::new(),
            logs_dir,
            defaults: RotationSettings::default(),
        }
    }

    pub fn with_default_settings(mut self, settings: RotationSettings) -> Self {
        self.defaults = settings;
        self
    }

    /// Registry whose handlers are relocated into `$GATEWAY_LOGS_PATH` when set,
    /// with fallback rotation settings from `RotationSettings::from_env`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(logs_dir_from_env()).with_default_settings(RotationSettings::from_env()?))
    }

    pub fn register(&mut self, logger_name: impl Into<String>, handler: SharedHandler) {
        self.handlers.insert(logger_name.into(), handler);
    }

    pub fn lookup(&self, logger_name: &str) -> Option<SharedHandler> {
        self.handlers.get(logger_name).cloned()
    }

    /// Per-connector log file that inherits the `connector` handler's settings.
    pub fn connector_file_handler(&self, file_name: &str) -> Result<SharedHandler> {
        self.file_handler_like(file_name, CONNECTOR_LOGGER)
    }

    /// Per-converter log file that inherits the `converter` handler's settings.
    pub fn converter_file_handler(&self, file_name: &str) -> Result<SharedHandler> {
        self.file_handler_like(file_name, CONVERTER_LOGGER)
    }

    fn file_handler_like(&self, file_name: &str, logger_name: &str) -> Result<SharedHandler> {
        let file_name = with_log_extension(file_name);
        let logs_dir = self.logs_dir.as_deref();

        let handler = match self.lookup(logger_name) {
            Some(base) => {
                let base = base
                    .lock()
                    .map_err(|_| anyhow!("handler {logger_name} mutex poisoned"))?;
                base.clone_to(&file_name, logs_dir)?
            }
            None => {
                tracing::debug!(logger = logger_name, file = %file_name, "no base handler registered, using defaults");
                RotatingFileHandler::create(&file_name, self.defaults.clone(), logs_dir)?
            }
        };
        Ok(Arc::new(Mutex::new(handler)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::logfile::RotationWhen;

    fn shared(h: RotatingFileHandler) -> SharedHandler {
        Arc::new(Mutex::new(h))
    }

    #[test]
    fn clones_registered_connector_handler() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RotationSettings {
            when: RotationWhen::Midnight,
            interval: 1,
            backup_count: 7,
            utc: true,
            delay: false,
            format: LogFormat::Json,
        };
        let base = RotatingFileHandler::create(dir.path().join("connector.log"), settings.clone(), None).unwrap();

        let mut reg = HandlerRegistry::new(None);
        reg.register(CONNECTOR_LOGGER, shared(base));
        assert!(reg.lookup(CONNECTOR_LOGGER).is_some());
        assert!(reg.lookup(CONVERTER_LOGGER).is_none());

        let h = reg.connector_file_handler("Boiler Room").unwrap();
        let h = h.lock().unwrap();
        assert_eq!(h.path(), dir.path().join("boiler_room.log"));
        assert_eq!(h.settings(), &settings);
    }

    #[test]
    fn logs_dir_overrides_base_directory() {
        let base_dir = tempfile::tempdir().unwrap();
        let logs_dir = tempfile::tempdir().unwrap();
        let base =
            RotatingFileHandler::create(base_dir.path().join("converter.log"), RotationSettings::default(), None)
                .unwrap();

        let mut reg = HandlerRegistry::new(Some(logs_dir.path().to_path_buf()));
        reg.register(CONVERTER_LOGGER, shared(base));

        let h = reg.converter_file_handler("TagValuesConverter.log").unwrap();
        let h = h.lock().unwrap();
        assert_eq!(h.path(), logs_dir.path().join("tag_values_converter.log"));
    }

    #[test]
    fn handler_writer_appends_to_file() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let base = RotatingFileHandler::create(dir.path().join("w.log"), RotationSettings::default(), None).unwrap();
        let path = base.path().to_path_buf();
        let mut w = HandlerWriter(shared(base));
        w.write_all(b"hello\n").unwrap();
        w.flush().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello\n");
    }

    fn log_through(handler: SharedHandler, msg: &str) {
        use tracing_subscriber::prelude::*;
        let layer = file_layer(handler).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || tracing::info!(poll = 1, "{msg}"));
    }

    #[test]
    fn copied_handler_keeps_base_format() {
        let dir = tempfile::tempdir().unwrap();
        let compact = RotationSettings {
            format: LogFormat::Compact,
            ..RotationSettings::default()
        };
        let base = RotatingFileHandler::create(dir.path().join("connector.log"), compact, None).unwrap();
        let mut reg = HandlerRegistry::new(None);
        reg.register(CONNECTOR_LOGGER, shared(base));

        let h = reg.connector_file_handler("Compact Line").unwrap();
        let path = h.lock().unwrap().path().to_path_buf();
        log_through(h, "compact record");

        let text = std::fs::read_to_string(path).unwrap();
        let line = text.lines().next().expect("one line written");
        assert!(line.contains("compact record"), "{line}");
        assert!(serde_json::from_str::<serde_json::Value>(line).is_err(), "expected plain text: {line}");
    }

    #[test]
    fn json_handler_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let json = RotationSettings {
            format: LogFormat::Json,
            ..RotationSettings::default()
        };
        let reg = HandlerRegistry::new(Some(dir.path().to_path_buf())).with_default_settings(json);
        let h = reg.connector_file_handler("Json Line").unwrap();
        let path = h.lock().unwrap().path().to_path_buf();
        log_through(h, "json record");

        let text = std::fs::read_to_string(path).unwrap();
        let line = text.lines().next().expect("one line written");
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["fields"]["message"], "json record");
    }

    #[test]
    fn falls_back_to_default_handler() {
        let logs_dir = tempfile::tempdir().unwrap();
        let reg = HandlerRegistry::new(Some(logs_dir.path().to_path_buf()));
        let h = reg.connector_file_handler("solo").unwrap();
        let h = h.lock().unwrap();
        assert_eq!(h.path(), logs_dir.path().join("solo.log"));
        assert_eq!(h.settings(), &RotationSettings::default());
    }
}
