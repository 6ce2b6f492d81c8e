//! Private HTTP/XML transport for FSAPI device communication
//!
//! This crate performs exactly one HTTP GET per call against an internet
//! radio's control endpoint and hands back the parsed XML tree. It knows
//! nothing about sessions, statuses or retries; those live in the `fsapi`
//! crate on top of it.
//!
//! The [`Transport`] trait is the seam higher layers are written against so
//! that tests can swap the network for a scripted in-memory implementation.

mod error;
#[cfg(feature = "test-support")]
pub mod testing;

pub use error::TransportError;
pub use xmltree::Element;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// A single logical request: endpoint path plus query parameters
///
/// The path is the part after the control prefix, e.g. `GET/netremote.sys.power`
/// or `LIST_GET_NEXT/netremote.sys.caps.validmodes/-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsapiRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl FsapiRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Look up the first query parameter with the given name
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One request/response round trip to a device
///
/// Implementations must never retry and must map every failure (network
/// error, empty body, unparseable payload) to a [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        address: &str,
        request: &FsapiRequest,
    ) -> Result<Element, TransportError>;
}

/// Timeouts and path layout for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Must exceed the device's long-poll window or every `GET_NOTIFIES`
    /// call surfaces as a network failure.
    pub request_timeout: Duration,
    pub path_prefix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(35),
            path_prefix: "fsapi".to_string(),
        }
    }
}

/// HTTP implementation of [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    path_prefix: String,
}

impl HttpTransport {
    /// Create a transport with default timeouts
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            path_prefix: config.path_prefix.trim_matches('/').to_string(),
        })
    }

    fn url(&self, address: &str, path: &str) -> String {
        if self.path_prefix.is_empty() {
            format!("http://{}/{}/", address, path)
        } else {
            format!("http://{}/{}/{}/", address, self.path_prefix, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        address: &str,
        request: &FsapiRequest,
    ) -> Result<Element, TransportError> {
        let url = self.url(address, &request.path);
        debug!(%address, path = %request.path, "fsapi request");

        let response = self
            .client
            .get(&url)
            .query(&request.params)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        // Devices answer session errors with non-200 codes and an XML body,
        // so the status code alone decides nothing here.
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            debug!(%address, path = %request.path, %status, "non-success HTTP status");
        }

        parse_body(&text)
    }
}

/// Parse a response body into an element tree
///
/// Whitespace-only bodies are reported as [`TransportError::EmptyBody`].
pub fn parse_body(text: &str) -> Result<Element, TransportError> {
    if text.trim().is_empty() {
        return Err(TransportError::EmptyBody);
    }

    Element::parse(text.as_bytes()).map_err(|e| TransportError::Parse(e.to_string()))
}
