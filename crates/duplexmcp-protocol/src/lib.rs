//! # duplexmcp-protocol
//!
//! Protocol layer for the duplexmcp runtime: JSON-RPC 2.0 envelope types,
//! envelope-level validation, the closed error taxonomy, capability records,
//! and the domain types exchanged between peers.
//!
//! Everything on the wire is one of four frame variants ([`jsonrpc::JsonRpcMessage`]):
//! request, response, error response, or notification. The [`codec`] module is
//! the single entry point for turning bytes into validated frames; downstream
//! components (the session engine, the facades) assume well-formed variants and
//! never re-validate envelope shape.

pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use error::{ErrorKind, McpError, McpResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ProgressToken, RequestId, ResponseId,
};

/// The protocol revision this runtime speaks.
///
/// A client rejects any `initialize` result carrying a different version and
/// closes the session.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag required on every frame.
pub const JSONRPC_VERSION: &str = "2.0";
