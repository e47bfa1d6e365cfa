//! Response writers an [`Upgrader`](crate::Upgrader) can take over.

use std::convert::Infallible;
use std::io;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// The writing half of an HTTP response.
///
/// Status and headers are committed by the first write or flush; header
/// changes after that are ignored.
#[async_trait]
pub trait ResponseSink: Send + 'static {
    /// Whether written bytes can reach the peer before the response completes.
    fn supports_flush(&self) -> bool;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Answer with an error status and plain-text body, ending the response.
    async fn write_error(&mut self, status: StatusCode, message: &str) -> io::Result<()>;

    async fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;
}

type Head = (StatusCode, HeaderMap);

/// A [`ResponseSink`] feeding an axum streaming [`Body`] through a bounded channel.
pub struct ChannelSink {
    head_tx: Option<oneshot::Sender<Head>>,
    headers: HeaderMap,
    buffer: BytesMut,
    body_tx: Option<mpsc::Sender<Result<Bytes, Infallible>>>,
}

/// The reading half of a [`ChannelSink`], turned into a response once the head
/// is committed.
pub struct PendingResponse {
    head_rx: oneshot::Receiver<Head>,
    body: Body,
}

impl ChannelSink {
    /// Create a sink whose body holds at most `capacity` unread chunks.
    ///
    /// `ctx` is cancelled when the HTTP server drops the response body, which
    /// happens when the peer disconnects.
    pub fn new(capacity: usize, ctx: CancellationToken) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));

        let guard = ctx.drop_guard();
        let stream = ReceiverStream::new(body_rx).map(move |chunk| {
            let _guard = &guard;
            chunk
        });

        let sink = Self {
            head_tx: Some(head_tx),
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
            body_tx: Some(body_tx),
        };
        let pending = PendingResponse {
            head_rx,
            body: Body::from_stream(stream),
        };
        (sink, pending)
    }

    fn commit(&mut self, status: StatusCode) {
        if let Some(head_tx) = self.head_tx.take() {
            let _ = head_tx.send((status, std::mem::take(&mut self.headers)));
        }
    }

    async fn send_buffered(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        let body_tx = self.body_tx.as_ref().ok_or_else(closed)?;
        body_tx.send(Ok(chunk)).await.map_err(|_| closed())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body closed")
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn supports_flush(&self) -> bool {
        true
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_error(&mut self, status: StatusCode, message: &str) -> io::Result<()> {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.buffer.clear();
        self.buffer.extend_from_slice(message.as_bytes());
        self.buffer.extend_from_slice(b"\n");
        self.commit(status);
        let result = self.send_buffered().await;
        self.body_tx = None;
        result
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.body_tx.is_none() {
            return Err(closed());
        }
        self.commit(StatusCode::OK);
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.commit(StatusCode::OK);
        self.send_buffered().await
    }
}

impl PendingResponse {
    /// Wait for the head and build the streaming response.
    ///
    /// A sink dropped without committing anything yields a bare 500.
    pub async fn into_response(self) -> Response {
        match self.head_rx.await {
            Ok((status, headers)) => {
                let mut response = Response::new(self.body);
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(_) => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}
