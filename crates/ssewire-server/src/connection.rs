//! Event-stream connection handle and its dispatch task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ssewire_core::error::{Result, SseError};
use ssewire_core::protocol::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sink::ResponseSink;

/// Handle to an upgraded connection.
///
/// Clones share the same queue. The dispatch task exits when [`shutdown`]
/// is called, when the request context is cancelled, when a write fails, or
/// when every handle has been dropped.
///
/// [`shutdown`]: Connection::shutdown
#[derive(Debug, Clone)]
pub struct Connection {
    id: Arc<str>,
    messages: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Spawn the dispatch task for `sink` and return its handle.
    pub(crate) fn spawn<S: ResponseSink>(
        sink: S,
        ctx: CancellationToken,
        queue_capacity: usize,
    ) -> Self {
        let (messages, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Self {
            id: Uuid::new_v4().to_string().into(),
            messages,
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
            open: Arc::new(AtomicBool::new(true)),
        };

        let task = Dispatch {
            conn_id: conn.id.clone(),
            sink,
            messages: rx,
            shutdown: conn.shutdown.clone(),
            ctx,
            open: conn.open.clone(),
            finished: conn.finished.clone(),
        };
        tokio::spawn(task.run());

        conn
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a message, waiting for room if the queue is full.
    pub async fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(SseError::ConnectionClosed);
        }
        self.messages
            .send(message)
            .await
            .map_err(|_| SseError::ConnectionClosed)
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(SseError::ConnectionClosed);
        }
        self.messages.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SseError::QueueFull,
            TrySendError::Closed(_) => SseError::ConnectionClosed,
        })
    }

    /// Ask the dispatch task to stop. Queued messages are discarded.
    ///
    /// Calling this more than once, or after the task has exited, does nothing.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the dispatch task has exited.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

struct Dispatch<S> {
    conn_id: Arc<str>,
    sink: S,
    messages: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
    ctx: CancellationToken,
    open: Arc<AtomicBool>,
    finished: CancellationToken,
}

impl<S: ResponseSink> Dispatch<S> {
    async fn run(mut self) {
        let conn_id = self.conn_id.clone();
        debug!(conn_id = %conn_id, "Dispatch task started");

        let mut sent = 0u64;
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(conn_id = %conn_id, "Shutdown requested");
                    break;
                }
                _ = self.ctx.cancelled() => {
                    debug!(conn_id = %conn_id, "Request context cancelled");
                    break;
                }
                message = self.messages.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!(conn_id = %conn_id, "All connection handles dropped");
                        break;
                    }
                },
            };

            let frame = message.encode();
            let written = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.ctx.cancelled() => break,
                res = write_frame(&mut self.sink, frame.as_bytes()) => res,
            };
            if let Err(e) = written {
                warn!(conn_id = %conn_id, %e, "Write failed, closing connection");
                break;
            }
            sent += 1;
        }

        self.messages.close();
        self.open.store(false, Ordering::Release);
        self.finished.cancel();
        info!(conn_id = %conn_id, sent, "Event stream connection closed");
    }
}

async fn write_frame<S: ResponseSink>(sink: &mut S, frame: &[u8]) -> std::io::Result<()> {
    sink.write(frame).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_support::RecordingSink;

    async fn wait_closed(conn: &Connection) {
        tokio::time::timeout(Duration::from_secs(2), conn.closed())
            .await
            .expect("dispatch task should exit");
    }

    async fn wait_for_flushes(recorded: &std::sync::Mutex<crate::test_support::Recorded>, n: usize) {
        for _ in 0..100 {
            if recorded.lock().unwrap().flushed.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} flushed frames");
    }

    #[tokio::test]
    async fn test_messages_written_one_frame_per_flush() {
        let (sink, recorded) = RecordingSink::new();
        let conn = Connection::spawn(sink, CancellationToken::new(), 8);

        conn.send(Message::new("hello").with_id("1").with_event("greet"))
            .await
            .unwrap();
        conn.send(Message::new("plain")).await.unwrap();
        wait_for_flushes(&recorded, 2).await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.flushed[0], "id: 1\nevent: greet\ndata: hello\n\n");
        assert_eq!(recorded.flushed[1], "data: plain\n\n");
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_is_idempotent() {
        let (sink, _recorded) = RecordingSink::new();
        let conn = Connection::spawn(sink, CancellationToken::new(), 8);

        conn.shutdown();
        wait_closed(&conn).await;
        assert!(!conn.is_open());
        conn.shutdown();

        let err = conn.send(Message::new("late")).await.unwrap_err();
        assert!(matches!(err, SseError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_context_cancel_closes_with_messages_queued() {
        let (sink, recorded) = RecordingSink::new();
        let ctx = CancellationToken::new();
        let conn = Connection::spawn(sink, ctx.clone(), 8);

        // Single-threaded test runtime: the task has not drained anything yet.
        for i in 0..3 {
            conn.try_send(Message::new(i.to_string())).unwrap();
        }
        ctx.cancel();
        wait_closed(&conn).await;

        assert!(!conn.is_open());
        assert!(matches!(
            conn.try_send(Message::new("late")),
            Err(SseError::ConnectionClosed)
        ));
        let recorded = recorded.lock().unwrap();
        assert!(recorded.flushed.is_empty());
        assert_eq!(recorded.writes, 0);
    }

    #[tokio::test]
    async fn test_write_failure_closes_connection() {
        let (sink, _recorded) = RecordingSink::failing_after(0);
        let conn = Connection::spawn(sink, CancellationToken::new(), 8);

        conn.send(Message::new("boom")).await.unwrap();
        wait_closed(&conn).await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_ends_task() {
        let (sink, _recorded) = RecordingSink::new();
        let conn = Connection::spawn(sink, CancellationToken::new(), 8);
        let finished = conn.finished.clone();
        let open = conn.open.clone();

        drop(conn);
        tokio::time::timeout(Duration::from_secs(2), finished.cancelled())
            .await
            .unwrap();
        assert!(!open.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let (sink, _recorded) = RecordingSink::new();
        let conn = Connection::spawn(sink, CancellationToken::new(), 1);

        // Single-threaded test runtime: the task has not polled the queue yet.
        conn.try_send(Message::new("a")).unwrap();
        assert!(matches!(
            conn.try_send(Message::new("b")),
            Err(SseError::QueueFull)
        ));
    }
}
