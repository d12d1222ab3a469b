use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::errors::TransportError;

/// Errors raised while preparing the HTTP client or the request template.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid HTTP method: '{0}'")]
    InvalidMethod(String),

    #[error("Invalid header name: {reason}. Name: '{name}'")]
    InvalidHeaderName { name: String, reason: String },

    #[error("Invalid header value for '{name}': {reason}")]
    InvalidHeaderValue { name: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub pool_config: PoolConfig,
}

/// Builds the shared reqwest client.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let client_builder = config
        .pool_config
        .apply_to_builder(reqwest::Client::builder());
    info!(
        max_idle_per_host = config.pool_config.max_idle_per_host,
        idle_timeout = ?config.pool_config.idle_timeout,
        "Connection pool configured"
    );

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(client)
}

/// Whether a request with this method gets the configured body.
///
/// Safe methods (GET, HEAD, OPTIONS, TRACE) are sent without one.
pub fn method_carries_body(method: &Method) -> bool {
    !matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE")
}

/// Build a header map from ordered `(name, value)` pairs.
///
/// Pairs are applied in order; a repeated name replaces the earlier value.
pub fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap, ClientError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_str(name).map_err(|e| ClientError::InvalidHeaderName {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeaderValue {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// The request every worker sends, built once per run.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: HeaderMap,
}

impl RequestSpec {
    pub fn new(
        method: &str,
        url: &str,
        body: Option<&str>,
        headers: &[(String, String)],
    ) -> Result<Self, ClientError> {
        let upper = method.trim().to_uppercase();
        let method = Method::from_bytes(upper.as_bytes())
            .map_err(|_| ClientError::InvalidMethod(method.to_string()))?;

        let body = body
            .filter(|b| !b.is_empty() && method_carries_body(&method))
            .map(str::to_string);

        Ok(Self {
            method,
            url: url.to_string(),
            body,
            headers: build_header_map(headers)?,
        })
    }
}

/// What a completed round trip produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: u16,
    /// Response body bytes drained.
    pub bytes: u64,
}

/// Sends one request and waits for the full response.
///
/// Implementations are shared by every worker and must be usable
/// concurrently. The response body has to be drained before returning so
/// keep-alive connections go back to the pool.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec, timeout: Duration)
        -> Result<Outcome, TransportError>;
}

/// [`Transport`] over a pooled reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::new(build_client(config)?))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestSpec,
        timeout: Duration,
    ) -> Result<Outcome, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();

        // Stream and discard the body; a failure mid-body still leaves us
        // with a status to classify.
        let mut bytes = 0u64;
        while let Ok(Some(chunk)) = response.chunk().await {
            bytes += chunk.len() as u64;
        }

        Ok(Outcome { status, bytes })
    }
}
