//! `text/event-stream` wire format.
//!
//! A stream is a sequence of UTF-8 lines separated by `\n`. Lines starting with
//! `:` are comments; every other non-empty line is a `<name>:<value>` field and
//! a blank line terminates the current frame.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SseError};

/// Media type of an event stream, used for both `Content-Type` and `Accept`.
pub const CONTENT_TYPE: &str = "text/event-stream";

pub const FIELD_ID: &str = "id";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DATA: &str = "data";
pub const FIELD_RETRY: &str = "retry";

/// Leading byte of a comment line.
pub const COMMENT_PREFIX: u8 = b':';

/// A server-authored message, written to the peer as one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default)]
    pub data: String,
}

impl Message {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Reject an `id` or `event` that would end its field line early.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [(FIELD_ID, &self.id), (FIELD_EVENT, &self.event)] {
            if value.as_deref().is_some_and(has_line_break) {
                return Err(SseError::InvalidMessage(format!(
                    "{field} must not contain a line break"
                )));
            }
        }
        Ok(())
    }

    /// Serialize into a complete frame.
    ///
    /// `id` and `event` lines are only written when non-empty, with any `\r`
    /// or `\n` removed. The payload is split at `\r\n`, `\r` and `\n` into one
    /// `data:` line per line, so readers rejoin it with `\n`.
    pub fn encode(&self) -> String {
        let mut frame = String::with_capacity(self.data.len() + 32);
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            let _ = writeln!(frame, "{FIELD_ID}: {}", strip_line_breaks(id));
        }
        if let Some(event) = self.event.as_deref().filter(|ev| !ev.is_empty()) {
            let _ = writeln!(frame, "{FIELD_EVENT}: {}", strip_line_breaks(event));
        }
        for line in data_lines(&self.data) {
            let _ = writeln!(frame, "{FIELD_DATA}: {line}");
        }
        frame.push('\n');
        frame
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

fn strip_line_breaks(value: &str) -> Cow<'_, str> {
    if has_line_break(value) {
        Cow::Owned(value.replace(['\r', '\n'], ""))
    } else {
        Cow::Borrowed(value)
    }
}

fn data_lines(data: &str) -> impl Iterator<Item = &str> {
    data.split("\r\n").flat_map(|part| part.split(['\r', '\n']))
}

/// Serialize the reconnection hint sent once at stream start.
///
/// The value is written as integer milliseconds, the only form browsers accept.
pub fn encode_retry(retry: Duration) -> String {
    format!("{FIELD_RETRY}: {}\n", retry.as_millis())
}
