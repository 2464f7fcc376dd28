//! # duplexmcp-session
//!
//! The session engine both peers run: a symmetric, bidirectional JSON-RPC
//! dispatcher over one [`duplexmcp_transport::Transport`].
//!
//! The engine owns the mapping from outbound request ids to pending awaiters
//! ([`pending`]), routes every inbound frame to either a pending awaiter, the
//! notification router ([`router`]), or a role-supplied request dispatcher,
//! and enforces the initialize/ready/closed state machine ([`state`]) on both
//! sides. Protocol errors are surfaced through error observers without ever
//! destabilizing the dispatch loop.
//!
//! The two facades differ only in what they plug in: the client facade runs
//! the initialize handshake and leaves inbound requests to a built-in
//! `ping`/method-not-found fallback; the server facade installs a
//! [`RequestDispatcher`] over its registries.

pub mod pending;
pub mod router;
pub mod session;
pub mod state;

pub use pending::{PendingTable, ProgressRegistry, ProgressSink};
pub use router::NotificationRouter;
pub use session::{RequestDispatcher, Session, SessionConfig, SessionRole};
pub use state::SessionState;
