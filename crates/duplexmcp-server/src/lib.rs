//! # duplexmcp-server
//!
//! The server facade: registries for methods, tools (with schema-validated
//! inputs), prompts (with required-argument checks), resources (with per-uri
//! subscription tracking), and roots, plus a logging threshold. Everything
//! drives the same session engine the client runs.
//!
//! Mutating a registry fires the matching `…/list_changed` notification, and
//! overwriting an existing resource uri additionally fires a per-uri
//! `updated` notification, in that order.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use duplexmcp_protocol::types::Tool;
//! use duplexmcp_server::{Server, ServerOptions};
//! use duplexmcp_transport::StdioTransport;
//!
//! # async fn example() -> duplexmcp_protocol::McpResult<()> {
//! let server = Server::new(Arc::new(StdioTransport::new()), ServerOptions::default());
//! server
//!     .register_tool(
//!         Tool {
//!             name: "echo".into(),
//!             description: Some("Echo the input".into()),
//!             input_schema: json!({"type": "object"}),
//!         },
//!         |args, _ctx| async move { Ok(json!({"echo": args})) },
//!     )
//!     .await?;
//! server.connect().await?;
//! # Ok(())
//! # }
//! ```

mod registry;
mod server;

pub use registry::{
    MethodHandler, PromptHandler, ResourceReader, SamplingHandler, ToolContext, ToolHandler,
};
pub use server::{ProgressReporter, Server, ServerOptions};
