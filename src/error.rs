use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures that end the subscriber (or stop it from starting).
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to connect to broker at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to subscribe to channel {channel}: {source}")]
    Subscription {
        channel: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to fetch next message: {0}")]
    Fetch(#[source] BoxError),

    #[error("broker closed the message stream")]
    StreamClosed,
}

impl SubscriberError {
    /// Whether the process should exit non-zero after this error. A broken
    /// message stream still ends with a completed cleanup, so it exits zero.
    pub fn fails_process(&self) -> bool {
        !matches!(self, SubscriberError::Fetch(_) | SubscriberError::StreamClosed)
    }
}

/// Per-message failure raised by a handler. Logged; never ends the loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// For handlers that validate their payload. The booking handlers
    /// substitute placeholders instead and never return it.
    #[error("handler for {channel} failed: {message}")]
    Failed { channel: String, message: String },

    #[error("handler for {channel} panicked: {message}")]
    Panicked { channel: String, message: String },
}
