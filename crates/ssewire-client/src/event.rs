use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;

/// An event reconstructed from one frame of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    source: Arc<str>,
    event_type: String,
    id: String,
    data: Bytes,
}

impl Event {
    pub(crate) fn new(source: Arc<str>, event_type: String, id: String, data: Bytes) -> Self {
        Self {
            source,
            event_type,
            id,
            data,
        }
    }

    /// The stream this event was read from (the request URI).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Value of the last `event` field, or `""` if none was sent.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Value of the last `id` field, or `""` if none was sent.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `data` fields of the frame joined by `\n`.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}
