//! # duplexmcp-transport
//!
//! Pluggable byte streams for the duplexmcp session engine.
//!
//! The [`Transport`] trait is the only contract the session depends on: an
//! asynchronous duplex pipe that delivers whole, validated frames to message
//! subscribers and surfaces everything that goes wrong to error subscribers.
//! Framing is each transport's problem:
//!
//! - [`stdio::StdioTransport`]: newline-delimited JSON over stdin/stdout or
//!   arbitrary async streams,
//! - [`sse::SseClientTransport`]: Server-Sent Events inbound, HTTP POST
//!   outbound,
//! - [`memory::InMemoryTransport`]: a paired endpoint whose `send` posts
//!   directly to the peer's subscribers, used by tests.
//!
//! Delivery guarantees the session relies on: frames reach subscribers in
//! send order, one handler's behavior never prevents delivery to the others,
//! and transport failures are emitted to error subscribers instead of
//! panicking.

pub mod error;
pub mod events;
pub mod memory;
pub mod sse;
pub mod stdio;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use events::{Subscription, SubscriberSet};
pub use memory::InMemoryTransport;
pub use sse::{SseClientConfig, SseClientTransport};
pub use stdio::StdioTransport;
pub use traits::{ErrorHandler, MessageHandler, Transport, TransportState};
