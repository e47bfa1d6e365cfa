//! Client side of the `text/event-stream` protocol.
//!
//! Bytes from a response body are split into lines by [`LineDecoder`], turned
//! into [`Event`]s by [`EventStreamParser`], and delivered to application code
//! by [`StreamNotifier`].

pub mod event;
pub mod lines;
pub mod notifier;
pub mod parser;
pub mod stream;
pub mod transport;

pub use event::Event;
pub use lines::LineDecoder;
pub use notifier::{NotifierConfig, StreamNotifier};
pub use parser::EventStreamParser;
pub use stream::event_stream;
pub use transport::{BodyStream, DefaultRequestFactory, ReqwestTransport, RequestFactory, Transport};
