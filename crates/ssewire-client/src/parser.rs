//! Line-oriented `text/event-stream` decoder.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use ssewire_core::protocol::COMMENT_PREFIX;
use tracing::trace;

use crate::event::Event;

/// Fields collected since the last dispatch boundary.
#[derive(Debug, Default)]
struct PendingEvent {
    event_type: String,
    id: String,
    data: Option<BytesMut>,
}

/// Stateful decoder turning lines into [`Event`]s.
///
/// Lines are fed one at a time without their terminator. An event is produced
/// at a blank line if at least one `event`, `data` or `id` field was seen since
/// the previous one.
#[derive(Debug)]
pub struct EventStreamParser {
    source: Arc<str>,
    current: Option<PendingEvent>,
}

impl EventStreamParser {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            current: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Feed one line. Returns an event only when `line` is blank.
    pub fn feed(&mut self, line: &[u8]) -> Option<Event> {
        if line.is_empty() {
            return self.take();
        }
        if line[0] == COMMENT_PREFIX {
            return None;
        }

        let (name, value) = split_field(line);
        match name {
            b"event" => self.pending().event_type = String::from_utf8_lossy(value).into_owned(),
            b"id" => self.pending().id = String::from_utf8_lossy(value).into_owned(),
            b"data" => {
                let pending = self.pending();
                match pending.data.as_mut() {
                    Some(buf) => {
                        buf.put_u8(b'\n');
                        buf.extend_from_slice(value);
                    }
                    None => pending.data = Some(BytesMut::from(value)),
                }
            }
            _ => trace!(field = %String::from_utf8_lossy(name), "Ignoring field"),
        }
        None
    }

    /// Take the event still pending at end of input, if any.
    ///
    /// A stream that ends without a final blank line leaves its last frame
    /// undispatched; callers decide whether to keep or drop it.
    pub fn finish(&mut self) -> Option<Event> {
        self.take()
    }

    /// Discard any partially collected event.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn has_pending(&self) -> bool {
        self.current.is_some()
    }

    fn pending(&mut self) -> &mut PendingEvent {
        self.current.get_or_insert_with(PendingEvent::default)
    }

    fn take(&mut self) -> Option<Event> {
        let pending = self.current.take()?;
        let data = pending.data.map(BytesMut::freeze).unwrap_or_default();
        Some(Event::new(
            self.source.clone(),
            pending.event_type,
            pending.id,
            data,
        ))
    }
}

/// Split at the first `:`, dropping at most one space from the value.
fn split_field(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|b| *b == b':') {
        Some(pos) => {
            let value = &line[pos + 1..];
            let value = match value.first() {
                Some(b' ') => &value[1..],
                _ => value,
            };
            (&line[..pos], value)
        }
        None => (line, &[][..]),
    }
}
