// src/ingest/connector.rs
//! Polling REST connector: owns the background loop and its lifecycle flags.
//!
//! `open()` spawns one tokio task that polls, converts, forwards and then sleeps for
//! the configured interval. `close()` only flips the flags; the task notices on its
//! next iteration, so shutdown can take up to one interval plus the request timeout.

use anyhow::{anyhow, bail, Context, Result};
use metrics::counter;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectorConfig, ConverterErrorPolicy};
use crate::ingest::converter::ConverterRegistry;
use crate::ingest::transport::{HttpTransport, PollRequest};
use crate::ingest::types::{Converter, StorageSink};
use crate::ingest::{ensure_metrics_described, poll_once, PollOutcome, Poller};

pub const DEFAULT_CONNECTOR_TYPE: &str = "rest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct Flags {
    opened: AtomicBool,
    stopped: AtomicBool,
    connected: AtomicBool,
}

pub struct RestConnector {
    poller: Arc<Poller>,
    connector_type: String,
    interval: Duration,
    flags: Arc<Flags>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RestConnector {
    /// Build a connector, resolving its converter through `registry`.
    ///
    /// A converter that cannot be built is fatal only with `onConverterError = "fail"`;
    /// otherwise the connector keeps polling and forwards nothing.
    pub fn new(
        config: ConnectorConfig,
        registry: &ConverterRegistry,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn StorageSink>,
    ) -> Result<Self> {
        let converter = match registry.build(&config.converter, &config) {
            Ok(c) => Some(c),
            Err(e) => match config.on_converter_error {
                ConverterErrorPolicy::Fail => {
                    return Err(e).with_context(|| format!("connector {}: loading converter", config.name))
                }
                ConverterErrorPolicy::Ignore => {
                    error!(
                        connector = %config.name,
                        error = %format!("{e:#}"),
                        "error loading converter, polls will forward nothing"
                    );
                    None
                }
            },
        };
        Ok(Self::with_converter(config, converter, transport, sink))
    }

    /// Build a connector around an already constructed converter.
    pub fn with_converter(
        config: ConnectorConfig,
        converter: Option<Arc<dyn Converter>>,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn StorageSink>,
    ) -> Self {
        let interval = config.polling_interval();
        let config = Arc::new(config);
        let poller = Poller {
            name: config.name.clone(),
            id: config.id.clone(),
            request: PollRequest::from_config(&config),
            config,
            converter,
            transport,
            sink,
        };
        info!(
            connector = %poller.name,
            interval_secs = interval.as_secs_f64(),
            "connector initialized"
        );
        Self {
            poller: Arc::new(poller),
            connector_type: DEFAULT_CONNECTOR_TYPE.to_string(),
            interval,
            flags: Arc::new(Flags::default()),
            task: Mutex::new(None),
        }
    }

    pub fn with_type(mut self, connector_type: impl Into<String>) -> Self {
        self.connector_type = connector_type.into();
        self
    }

    /// Start polling in the background. Must be called inside a tokio runtime.
    pub fn open(&self) -> Result<()> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("open() needs a tokio runtime: {e}"))?;
        if self.flags.opened.swap(true, Ordering::SeqCst) {
            bail!(
                "connector {} was already opened; create a new instance to poll again",
                self.poller.name
            );
        }
        ensure_metrics_described();

        self.flags.stopped.store(false, Ordering::SeqCst);
        self.flags.connected.store(true, Ordering::SeqCst);

        let handle = rt.spawn(run_loop(self.poller.clone(), self.flags.clone(), self.interval));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(connector = %self.poller.name, "connector started");
        Ok(())
    }

    /// Ask the loop to exit. Does not interrupt an in-flight request or sleep.
    pub fn close(&self) {
        self.flags.stopped.store(true, Ordering::SeqCst);
        self.flags.connected.store(false, Ordering::SeqCst);
        info!(connector = %self.poller.name, "connector stopped");
    }

    /// Wait for the background loop to finish. Returns at once if it never ran.
    pub async fn join(&self) {
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(h) = handle {
            if let Err(e) = h.await {
                error!(connector = %self.poller.name, error = %e, "poll loop ended abnormally");
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if !self.flags.opened.load(Ordering::SeqCst) {
            Lifecycle::Idle
        } else if self.flags.stopped.load(Ordering::SeqCst) {
            Lifecycle::Stopped
        } else {
            Lifecycle::Running
        }
    }

    pub fn id(&self) -> &str {
        &self.poller.id
    }

    pub fn name(&self) -> &str {
        &self.poller.name
    }

    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.poller.config
    }

    pub fn polling_interval(&self) -> Duration {
        self.interval
    }

    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::SeqCst)
    }

    pub fn has_converter(&self) -> bool {
        self.poller.converter.is_some()
    }

    /// Attribute updates are not supported; they are only logged.
    pub fn on_attributes_update(&self, content: &Value) {
        debug!(connector = %self.poller.name, %content, "received attribute update");
    }

    /// Server-side RPC is not supported; the caller gets an error result.
    pub fn server_side_rpc_handler(&self, content: &Value) -> Value {
        debug!(connector = %self.poller.name, %content, "received RPC request");
        json!({ "error": "RPC not supported" })
    }
}

impl Drop for RestConnector {
    fn drop(&mut self) {
        if self.lifecycle() == Lifecycle::Running {
            self.close();
        }
    }
}

async fn run_loop(poller: Arc<Poller>, flags: Arc<Flags>, interval: Duration) {
    while !flags.stopped.load(Ordering::SeqCst) {
        // Each poll runs as its own task so a panicking converter or sink
        // cannot take the loop down with it.
        let p = poller.clone();
        match tokio::spawn(async move { poll_once(&p).await }).await {
            Ok(Ok(PollOutcome::Forwarded(n))) => {
                debug!(connector = %poller.name, records = n, "poll tick done");
            }
            Ok(Ok(PollOutcome::Rejected { .. } | PollOutcome::NoConverter)) => {}
            Ok(Err(e)) => {
                error!(connector = %poller.name, error = ?e, "error during polling");
                counter!("connector_poll_errors_total", "connector" => poller.name.clone()).increment(1);
            }
            Err(join_err) => {
                error!(connector = %poller.name, error = %join_err, "poll task panicked");
                counter!("connector_poll_errors_total", "connector" => poller.name.clone()).increment(1);
            }
        }
        tokio::time::sleep(interval).await;
    }
    warn!(connector = %poller.name, "poll loop exited");
}
