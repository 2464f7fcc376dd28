//! Transport error types.

use duplexmcp_protocol::McpError;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors a transport can surface, either as a return value or through its
/// error subscribers.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport is closed; no further frames will flow.
    #[error("Transport closed: {0}")]
    Closed(String),

    /// `connect` was called on an already-connected transport.
    #[error("Transport already connected")]
    AlreadyConnected,

    /// An operation that requires a connection ran without one.
    #[error("Transport not connected")]
    NotConnected,

    /// A paired transport endpoint has no peer.
    #[error("Transport endpoint is not paired")]
    NotPaired,

    /// Failed to deliver a frame.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to read from the underlying stream.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// An inbound payload failed envelope validation. The session reports
    /// these through error subscribers without stopping the dispatch loop.
    #[error(transparent)]
    Protocol(#[from] McpError),

    /// An underlying I/O error.
    #[error("IO error: {0}")]
    Io(String),

    /// An HTTP-level failure (SSE transport).
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(inner) => inner,
            other => McpError::request_failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_protocol::ErrorKind;

    #[test]
    fn protocol_errors_keep_their_kind() {
        let err: McpError = TransportError::Protocol(McpError::parse_error("bad json")).into();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[test]
    fn infrastructure_errors_become_request_failed() {
        let err: McpError = TransportError::Closed("end of stream".into()).into();
        assert_eq!(err.kind, ErrorKind::RequestFailed);
        assert!(err.message.contains("Transport closed"));
    }
}
