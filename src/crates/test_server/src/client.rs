//! Client configuration handed back by the service and the HTTP liveness
//! probe built from it.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Url};

use crate::error::{HarnessError, HarnessResult};

/// Per-request timeout used unless the service asks for something else.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to reach the service's API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://127.0.0.1:40123`.
    pub host: String,
    /// Token sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
    /// PEM bundle trusted in addition to the platform roots.
    pub ca_file: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Timeout for a single request.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            bearer_token: None,
            ca_file: None,
            insecure: false,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A single liveness attempt. Returns the HTTP status of the endpoint.
///
/// An attempt must give up once `limit` has elapsed.
pub trait Liveness {
    fn check(&self, limit: Duration) -> anyhow::Result<u16>;
}

/// Blocking HTTP client bound to the service's liveness endpoint.
#[derive(Debug, Clone)]
pub struct HealthClient {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HealthClient {
    /// Build a client for `GET <host><path>`.
    pub fn new(config: &ClientConfig, path: &str) -> HarnessResult<Self> {
        let base = Url::parse(&config.host)
            .with_context(|| format!("invalid host {:?}", config.host))
            .map_err(HarnessError::client)?;
        let url = base
            .join(path)
            .with_context(|| format!("invalid health path {path:?}"))
            .map_err(HarnessError::client)?;

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(ca_file) = &config.ca_file {
            let pem = fs::read(ca_file)
                .with_context(|| format!("failed to read CA file {}", ca_file.display()))
                .map_err(HarnessError::client)?;
            let cert = Certificate::from_pem(&pem)
                .context("invalid CA bundle")
                .map_err(HarnessError::client)?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(token) = &config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("bearer token is not a valid header value")
                .map_err(HarnessError::client)?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(HarnessError::client)?;
        Ok(Self {
            client,
            url,
            timeout: config.timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Liveness for HealthClient {
    fn check(&self, limit: Duration) -> anyhow::Result<u16> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout.min(limit))
            .send()
            .with_context(|| format!("GET {} failed", self.url))?;
        Ok(response.status().as_u16())
    }
}
