//! Drives one event-stream request and forwards its events to a channel.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderValue};
use ssewire_core::config::ClientConfig;
use ssewire_core::error::{Result, SseError};
use ssewire_core::protocol;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::Event;
use crate::stream::event_stream;
use crate::transport::{DefaultRequestFactory, ReqwestTransport, RequestFactory, Transport};

#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    /// Hand out an event left pending when the stream ends without a blank line.
    pub dispatch_partial_on_eof: bool,
}

impl From<&ClientConfig> for NotifierConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            dispatch_partial_on_eof: config.dispatch_partial_on_eof,
        }
    }
}

/// Subscribes to event streams and delivers their events on a channel.
///
/// Each [`notify`](Self::notify) call runs until its stream is over, so it is
/// usually given its own task. Delivery awaits channel capacity: a slow
/// consumer stops the notifier from reading further body bytes.
pub struct StreamNotifier {
    config: NotifierConfig,
    request_factory: Arc<dyn RequestFactory>,
    transport: Arc<dyn Transport>,
}

impl StreamNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            request_factory: Arc::new(DefaultRequestFactory::new()),
            transport: Arc::new(ReqwestTransport::default()),
        }
    }

    /// Build a notifier with the default collaborators configured from `config`.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        let request_factory = DefaultRequestFactory::from_config(config)?;
        let transport = ReqwestTransport::from_config(config)?;
        Ok(Self {
            config: config.into(),
            request_factory: Arc::new(request_factory),
            transport: Arc::new(transport),
        })
    }

    pub fn with_request_factory(mut self, factory: impl RequestFactory + 'static) -> Self {
        self.request_factory = Arc::new(factory);
        self
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Stream events from `uri` into `output`.
    ///
    /// Returns `Ok` when the stream ends cleanly, when `cancel` fires, or when
    /// the receiving side of `output` goes away mid-stream. Fails with
    /// [`SseError::NilChannel`] before any network activity if `output` has no
    /// receiver to begin with. No retries are attempted.
    pub async fn notify(
        &self,
        uri: &str,
        output: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if output.is_closed() {
            return Err(SseError::NilChannel);
        }

        let mut request = self
            .request_factory
            .build(Method::GET, uri)
            .map_err(SseError::RequestBuild)?;
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static(protocol::CONTENT_TYPE));

        let body = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(uri, "Cancelled before response");
                return Ok(());
            }
            res = self.transport.round_trip(request) => res.map_err(|source| SseError::Transport {
                uri: uri.to_string(),
                source,
            })?,
        };
        info!(uri, "Event stream opened");

        let events = event_stream(uri, body, self.config.dispatch_partial_on_eof);
        futures::pin_mut!(events);

        let mut delivered = 0u64;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(uri, delivered, "Event stream cancelled");
                    return Ok(());
                }
                _ = output.closed() => {
                    debug!(uri, delivered, "Event receiver dropped, stopping");
                    return Ok(());
                }
                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e),
                None => {
                    info!(uri, delivered, "Event stream ended");
                    return Ok(());
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(uri, delivered, "Event stream cancelled during delivery");
                    return Ok(());
                }
                sent = output.send(event) => {
                    if sent.is_err() {
                        debug!(uri, delivered, "Event receiver dropped, stopping");
                        return Ok(());
                    }
                    delivered += 1;
                }
            }
        }
    }
}

impl Default for StreamNotifier {
    fn default() -> Self {
        Self::new(NotifierConfig::default())
    }
}
