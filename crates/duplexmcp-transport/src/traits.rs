//! The transport contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use duplexmcp_protocol::JsonRpcMessage;

use crate::error::TransportResult;
use crate::events::Subscription;

/// Handler invoked with every inbound frame.
pub type MessageHandler = Arc<dyn Fn(&JsonRpcMessage) + Send + Sync>;

/// Handler invoked with every transport-level error.
pub type ErrorHandler = Arc<dyn Fn(&crate::error::TransportError) + Send + Sync>;

/// Connection lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not yet connected, or cleanly disconnected
    #[default]
    Disconnected,
    /// Connected and flowing
    Connected,
    /// Terminally closed (peer gone, stream ended, fatal error)
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// An abstract duplex frame pipe.
///
/// The session engine owns exactly one transport for its lifetime, is its
/// only sender, and consumes frames through [`subscribe_messages`]. Concrete
/// implementations guarantee:
///
/// - frames are delivered to subscribers in the order the peer sent them;
/// - every subscriber sees every frame;
/// - failures are emitted to error subscribers, never panicked.
///
/// [`subscribe_messages`]: Transport::subscribe_messages
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Establish the connection. Fails with `AlreadyConnected` when called
    /// twice without an intervening disconnect, and with `NotPaired` on an
    /// unpaired in-memory endpoint.
    async fn connect(&self) -> TransportResult<()>;

    /// Tear down the connection and release listeners. Idempotent;
    /// a subsequent `send` fails with a closed-transport error.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Deliver one frame to the peer. Does not wait for any reply.
    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()>;

    /// Register a frame handler. Multiple handlers are allowed; each gets
    /// every frame, in registration order.
    fn subscribe_messages(&self, handler: MessageHandler) -> Subscription;

    /// Register an error handler. Multiple handlers are allowed.
    fn subscribe_errors(&self, handler: ErrorHandler) -> Subscription;

    /// True while the transport is in the connected state.
    fn is_connected(&self) -> bool;

    /// Endpoint address or identifier, when the transport has one.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The contract must stay object-safe; the session stores `Arc<dyn Transport>`.
    fn _assert_object_safe(_t: &dyn Transport) {}
}
