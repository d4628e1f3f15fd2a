// src/ingest/transport.rs
use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{ConnectorConfig, HttpMethod};

/// Fixed per-request timeout for polls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to issue one poll, captured from the config at construction.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub method: HttpMethod,
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
    pub timeout: Duration,
}

impl PollRequest {
    pub fn from_config(cfg: &ConnectorConfig) -> Self {
        Self {
            method: cfg.http_method,
            url: cfg.url.clone(),
            headers: cfg.headers.clone(),
            body: cfg.body.clone(),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, req: &PollRequest) -> Result<PollResponse>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name {k:?}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid value for header {k}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, req: &PollRequest) -> Result<PollResponse> {
        let url = req
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("connector has no url configured"))?;

        let builder = match req.method {
            HttpMethod::Post => self.client.post(url).json(&req.body),
            HttpMethod::Get => self.client.get(url),
        };
        let resp = builder
            .headers(header_map(&req.headers)?)
            .timeout(req.timeout)
            .send()
            .await
            .with_context(|| format!("{} {url}", req.method.as_str()))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.context("reading response body")?;
        Ok(PollResponse { status, body })
    }
}

// --- Test helper ---
type Responder = Box<dyn Fn(usize) -> Result<PollResponse> + Send + Sync>;

/// Scripted transport: `respond` gets the zero-based call number.
pub struct MockTransport {
    respond: Responder,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(usize) -> Result<PollResponse> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, _req: &PollRequest) -> Result<PollResponse> {
        let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (self.respond)(n)
    }
}
