//! # duplexmcp-client
//!
//! The client facade: a typed, capability-scoped surface over the session
//! engine. Every convenience call checks the server capability negotiated at
//! initialize and fails with a `RequestFailed` before touching the wire when
//! the feature was never advertised.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duplexmcp_client::Client;
//! use duplexmcp_transport::StdioTransport;
//!
//! # async fn example() -> duplexmcp_protocol::McpResult<()> {
//! let client = Client::new(Arc::new(StdioTransport::new()));
//! let init = client.connect().await?;
//! println!("connected to {} v{}", init.server_info.name, init.server_info.version);
//!
//! let tools = client.list_tools().await?;
//! let result = client.call_tool("echo", None).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod operations;

pub use client::{Client, ClientOptions};
