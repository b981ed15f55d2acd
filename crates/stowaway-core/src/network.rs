//! The network boundary.
//!
//! [`Network`] is what the worker calls when it has to leave the cache.
//! [`HttpNetwork`] is the production implementation on top of reqwest. It
//! classifies every response the way a browser would: same-origin responses
//! are `basic`, cross-origin ones are `cors`, or `opaque` when the request
//! was made in `no-cors` mode.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::NetworkError;
use crate::request::{Request, RequestMode};
use crate::response::{Response, ResponseType};

/// Default HTTP request timeout in seconds.
/// The worker itself imposes no timeout; this is the network layer's own.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform `request`. Any HTTP status counts as success; only transport
    /// failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// reqwest-backed network.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    /// Create a client for an application served from `origin`
    pub fn new(origin: Url, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn headers(request: &Request) -> Result<HeaderMap, NetworkError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| NetworkError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| NetworkError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.append(header_name, header_value);
        }
        Ok(headers)
    }

    fn classify(&self, request: &Request) -> ResponseType {
        if request.is_same_origin(&self.origin) {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(Self::headers(request)?);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let reply = builder.send().await?;

        let status = reply.status();
        let final_url = reply.url().clone();
        let headers = reply
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = reply.bytes().await?.to_vec();

        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Network response");

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            response_type: self.classify(request),
            url: Some(final_url),
        })
    }
}
