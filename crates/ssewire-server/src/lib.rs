//! Server side of the `text/event-stream` protocol.
//!
//! An [`Upgrader`] takes over a [`ResponseSink`], writes the stream headers and
//! hands back a [`Connection`]. Each connection owns one background task that
//! is the only writer of its sink.

pub mod connection;
pub mod hub;
pub mod server;
pub mod sink;
pub mod state;
pub mod upgrade;

#[cfg(test)]
mod test_support;

pub use connection::Connection;
pub use hub::Hub;
pub use server::{router, serve, start_server};
pub use sink::{ChannelSink, PendingResponse, ResponseSink};
pub use state::ServerState;
pub use upgrade::Upgrader;
