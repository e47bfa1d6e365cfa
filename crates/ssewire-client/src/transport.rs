//! HTTP collaborators used by the notifier: request construction and round-trip.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};
use ssewire_core::config::ClientConfig;
use ssewire_core::protocol;
use tracing::{debug, warn};

/// A response body as a stream of byte chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Builds the request for a stream URI.
///
/// The notifier overwrites the `Accept` header of whatever is returned.
pub trait RequestFactory: Send + Sync {
    fn build(&self, method: Method, uri: &str) -> anyhow::Result<Request>;
}

impl<F> RequestFactory for F
where
    F: Fn(Method, &str) -> anyhow::Result<Request> + Send + Sync,
{
    fn build(&self, method: Method, uri: &str) -> anyhow::Result<Request> {
        self(method, uri)
    }
}

/// Performs a request and hands back the response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request) -> anyhow::Result<BodyStream>;
}

/// Request factory adding a fixed set of headers.
#[derive(Debug, Clone, Default)]
pub struct DefaultRequestFactory {
    headers: HeaderMap,
}

impl DefaultRequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Collect configured extra headers and the bearer token.
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())?;
            headers.insert(name, HeaderValue::from_str(value)?);
        }
        if let Some(token) = config.resolve_bearer_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self::with_headers(headers))
    }
}

impl RequestFactory for DefaultRequestFactory {
    fn build(&self, method: Method, uri: &str) -> anyhow::Result<Request> {
        let url = Url::parse(uri)?;
        let mut request = Request::new(method, url);
        request.headers_mut().extend(self.headers.clone());
        Ok(request)
    }
}

/// Transport backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: Request) -> anyhow::Result<BodyStream> {
        let response = self.client.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, url = %response.url(), "Event stream answered with non-success status");
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(protocol::CONTENT_TYPE) {
            debug!(content_type, "Unexpected content type for event stream");
        }

        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other)),
        ))
    }
}
