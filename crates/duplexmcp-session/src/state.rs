//! Session lifecycle states.

use std::fmt;

/// Lifecycle of one session, on either peer.
///
/// ```text
/// Disconnected → Connecting → Initializing → Ready → Closing → Closed
/// ```
///
/// A fatal transport error moves any state straight to `Closed`. Entering
/// `Closed` cancels every pending awaiter with a transport-closed error and
/// clears the observer registries; the state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport connection
    #[default]
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// Transport up, initialize handshake not yet complete
    Initializing,
    /// Handshake complete; arbitrary methods may flow
    Ready,
    /// Orderly shutdown in progress
    Closing,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether the state machine permits moving to `next`. This is the
    /// single source of truth for the lifecycle; the session mutates state
    /// only through a guard built on it.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // Closed is terminal.
            (Closed, _) => false,
            // Fatal errors and shutdown may close from anywhere else.
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Initializing) => true,
            (Initializing, Ready) => true,
            (Ready | Initializing | Connecting, Closing) => true,
            _ => false,
        }
    }

    /// True once the session can carry arbitrary requests.
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    /// True for the terminal state.
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
