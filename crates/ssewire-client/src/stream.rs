//! Pull-style adapter: response body chunks in, events out.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use ssewire_core::error::{Result, SseError};
use tracing::trace;

use crate::event::Event;
use crate::lines::LineDecoder;
use crate::parser::EventStreamParser;

/// Decode a stream of body chunks into events.
///
/// The returned stream ends after the body ends or after the first read
/// error, which is yielded as [`SseError::StreamRead`]. An event left pending
/// when the body ends is dropped unless `dispatch_partial_on_eof` is set.
/// Nothing is read from `body` while an event is waiting to be taken.
pub fn event_stream<S, E>(
    source: impl Into<Arc<str>>,
    body: S,
    dispatch_partial_on_eof: bool,
) -> impl Stream<Item = Result<Event>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    futures::stream::unfold(
        DecodeState {
            body: Box::pin(body),
            lines: LineDecoder::new(),
            parser: EventStreamParser::new(source),
            dispatch_partial_on_eof,
            done: false,
        },
        |mut state| async move {
            loop {
                if state.done {
                    return None;
                }

                while let Some(line) = state.lines.next_line() {
                    if let Some(event) = state.parser.feed(&line) {
                        return Some((Ok(event), state));
                    }
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        trace!(len = chunk.len(), "Read chunk");
                        state.lines.push(&chunk);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        let err = std::io::Error::other(e);
                        return Some((Err(SseError::StreamRead(err)), state));
                    }
                    None => {
                        state.done = true;
                        if let Some(tail) = state.lines.finish() {
                            state.parser.feed(&tail);
                        }
                        if state.dispatch_partial_on_eof {
                            if let Some(event) = state.parser.finish() {
                                return Some((Ok(event), state));
                            }
                        } else if state.parser.has_pending() {
                            trace!(source = state.parser.source(), "Dropping undispatched event at end of stream");
                        }
                        return None;
                    }
                }
            }
        },
    )
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    lines: LineDecoder,
    parser: EventStreamParser,
    dispatch_partial_on_eof: bool,
    done: bool,
}
