//! Turns a response sink into an event-stream [`Connection`].

use std::time::Duration;

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use ssewire_core::config::ServerConfig;
use ssewire_core::error::{Result, SseError};
use ssewire_core::protocol::{self, encode_retry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::sink::ResponseSink;

const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct Upgrader {
    /// Reconnection delay announced to the client at stream start.
    retry: Option<Duration>,
    queue_capacity: usize,
}

impl Default for Upgrader {
    fn default() -> Self {
        Self {
            retry: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Upgrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            retry: config
                .retry_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            queue_capacity: config.queue_capacity,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Take over `sink` and start streaming.
    ///
    /// `ctx` is the request context: cancelling it (peer gone, server stopping)
    /// ends the connection. If the sink cannot flush incrementally the peer is
    /// sent a 500 and [`SseError::StreamingUnsupported`] is returned; the sink
    /// is consumed either way.
    pub async fn upgrade<S: ResponseSink>(
        &self,
        mut sink: S,
        ctx: CancellationToken,
    ) -> Result<Connection> {
        if !sink.supports_flush() {
            warn!("Response sink cannot stream, refusing upgrade");
            if let Err(e) = sink
                .write_error(StatusCode::INTERNAL_SERVER_ERROR, "Streaming unsupported!")
                .await
            {
                debug!(%e, "Failed to report unsupported streaming");
            }
            return Err(SseError::StreamingUnsupported);
        }

        let headers = sink.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(protocol::CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        if let Some(retry) = self.retry.filter(|r| !r.is_zero()) {
            sink.write(encode_retry(retry).as_bytes()).await?;
        }
        sink.flush().await?;

        let conn = Connection::spawn(sink, ctx, self.queue_capacity);
        debug!(conn_id = %conn.id(), "Upgraded to event stream");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssewire_core::protocol::Message;

    use crate::test_support::RecordingSink;

    #[tokio::test]
    async fn test_upgrade_sets_headers() {
        let (sink, recorded) = RecordingSink::new();
        let conn = Upgrader::new()
            .upgrade(sink, CancellationToken::new())
            .await
            .unwrap();
        assert!(conn.is_open());

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.headers[CONTENT_TYPE], "text/event-stream");
        assert_eq!(recorded.headers[CACHE_CONTROL], "no-cache");
        assert_eq!(recorded.headers[CONNECTION], "keep-alive");
        assert!(recorded.flushed.is_empty());
    }

    #[tokio::test]
    async fn test_retry_written_before_first_event() {
        let (sink, recorded) = RecordingSink::new();
        let conn = Upgrader::new()
            .with_retry(Duration::from_millis(1500))
            .upgrade(sink, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(recorded.lock().unwrap().flushed, vec!["retry: 1500\n"]);

        conn.send(Message::new("x")).await.unwrap();
        conn.shutdown();
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_zero_retry_not_written() {
        let (sink, recorded) = RecordingSink::new();
        Upgrader::new()
            .with_retry(Duration::ZERO)
            .upgrade(sink, CancellationToken::new())
            .await
            .unwrap();
        assert!(recorded.lock().unwrap().flushed.is_empty());
    }

    #[tokio::test]
    async fn test_unflushable_sink_rejected() {
        let (sink, recorded) = RecordingSink::unflushable();
        let err = Upgrader::new()
            .with_retry(Duration::from_secs(1))
            .upgrade(sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SseError::StreamingUnsupported));

        let recorded = recorded.lock().unwrap();
        let (status, _) = recorded.error.clone().expect("error response written");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(recorded.writes, 0);
        assert_eq!(recorded.flushes, 0);
        assert!(recorded.headers.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = ServerConfig {
            retry_ms: Some(0),
            queue_capacity: 4,
            ..ServerConfig::default()
        };
        let upgrader = Upgrader::from_config(&config);
        assert!(upgrader.retry.is_none());
        assert_eq!(upgrader.queue_capacity, 4);
    }
}
