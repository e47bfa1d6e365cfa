use thiserror::Error;

#[derive(Debug, Error)]
pub enum SseError {
    /// The output channel handed to the notifier has no receiver.
    #[error("Nil channel: output channel has no receiver")]
    NilChannel,

    #[error("Request build error: {0}")]
    RequestBuild(#[source] anyhow::Error),

    #[error("Transport error for {uri}: {source}")]
    Transport {
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Stream read error: {0}")]
    StreamRead(#[source] std::io::Error),

    #[error("Streaming unsupported")]
    StreamingUnsupported,

    #[error("Connection already closed")]
    ConnectionClosed,

    #[error("Connection queue is full")]
    QueueFull,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SseError>;
