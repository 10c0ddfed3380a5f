//! Bridge error types.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while relaying between editor and server.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The peer closed the stream.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Malformed framing or message.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The server process could not be started.
    #[error("Server process error: {0}")]
    ProcessError(String),

    /// A request sent by the bridge got an error response.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// A request sent by the bridge got no response in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }
}
