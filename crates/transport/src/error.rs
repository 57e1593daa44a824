use thiserror::Error;

/// Failures at the socket layer.
///
/// These never cross the sync layer's boundary; the feed absorbs them
/// into its retry schedule and observers only ever see the connection
/// state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid feed endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("connect attempt timed out")]
    Timeout,

    #[error("websocket failure: {0}")]
    WebSocket(String),

    #[error("feed closed by server{}", match .reason { Some(reason) => format!(": {reason}"), None => String::new() })]
    Closed { reason: Option<String> },

    #[error("feed is not connected")]
    NotConnected,
}

/// A frame that could not be turned into a change event.
///
/// Logged and dropped by the receive loop; never treated as a
/// connection failure.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("frame is not a change event: {0}")]
    Malformed(#[from] serde_json::Error),
}
