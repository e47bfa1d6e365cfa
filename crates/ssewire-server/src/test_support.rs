use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};

use crate::sink::ResponseSink;

/// Everything a [`RecordingSink`] was asked to do.
#[derive(Debug, Default)]
pub struct Recorded {
    pub headers: HeaderMap,
    /// Bytes made visible to the peer, one entry per non-empty flush.
    pub flushed: Vec<String>,
    pub flushes: usize,
    pub writes: usize,
    pub error: Option<(StatusCode, String)>,
}

/// In-memory sink whose history stays readable after it moves into a task.
pub struct RecordingSink {
    flushable: bool,
    fail_after: Option<usize>,
    headers: HeaderMap,
    pending: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let sink = Self {
            flushable: true,
            fail_after: None,
            headers: HeaderMap::new(),
            pending: String::new(),
            recorded: recorded.clone(),
        };
        (sink, recorded)
    }

    pub fn unflushable() -> (Self, Arc<Mutex<Recorded>>) {
        let (mut sink, recorded) = Self::new();
        sink.flushable = false;
        (sink, recorded)
    }

    /// Fail every flush after the first `flushes` succeed.
    pub fn failing_after(flushes: usize) -> (Self, Arc<Mutex<Recorded>>) {
        let (mut sink, recorded) = Self::new();
        sink.fail_after = Some(flushes);
        (sink, recorded)
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    fn supports_flush(&self) -> bool {
        self.flushable
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_error(&mut self, status: StatusCode, message: &str) -> io::Result<()> {
        self.recorded.lock().unwrap().error = Some((status, message.to_string()));
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.recorded.lock().unwrap().writes += 1;
        self.pending.push_str(&String::from_utf8_lossy(buf));
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        let mut recorded = self.recorded.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if recorded.flushes >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
        }
        recorded.flushes += 1;
        recorded.headers = self.headers.clone();
        if !self.pending.is_empty() {
            recorded.flushed.push(std::mem::take(&mut self.pending));
        }
        Ok(())
    }
}
