use thiserror::Error;

/// Failures opening or writing to the underlying socket.
///
/// These never reach consumers; the driver funnels all of them into the
/// reconnection path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be turned into a client request.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The endpoint uses a scheme other than `ws` / `wss`.
    #[error("unsupported socket scheme: {0}")]
    UnsupportedScheme(String),

    /// The socket is gone (closed, or never opened).
    #[error("socket {0} is not writable")]
    NotWritable(u64),
}

/// Malformed frames on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has an empty topic")]
    EmptyTopic,
}

/// Failures deriving the live endpoint from a page origin.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid origin {0:?}")]
    InvalidOrigin(String),

    #[error("unsupported page scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("origin {0:?} has no host")]
    MissingHost(String),
}
