//! Client lifecycle and observer registration.

use std::sync::Arc;
use std::time::Duration;

use duplexmcp_protocol::jsonrpc::JsonRpcNotification;
use duplexmcp_protocol::types::{
    ClientCapabilities, Implementation, InitializeResult, LogMessageParams, Root,
    SamplingMessage, ServerCapabilities,
};
use duplexmcp_protocol::{McpError, McpResult, RequestId};
use duplexmcp_session::{Session, SessionConfig, SessionState};
use duplexmcp_transport::{Subscription, Transport};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity sent in the initialize handshake
    pub info: Implementation,
    /// Capabilities advertised to the server
    pub capabilities: ClientCapabilities,
    /// Deadline for every request
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            info: Implementation::new("duplexmcp-client", env!("CARGO_PKG_VERSION")),
            capabilities: ClientCapabilities::default(),
            request_timeout: SessionConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// An MCP client over one transport.
///
/// Create, [`connect`](Client::connect), then use the capability-scoped
/// operations. The negotiated server capabilities are frozen for the
/// session's lifetime; a call whose capability was not advertised fails
/// without hitting the wire.
#[derive(Debug)]
pub struct Client {
    pub(crate) session: Arc<Session>,
}

impl Client {
    /// Client with default options.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Client with explicit options.
    pub fn with_options(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let config = SessionConfig::client(options.info)
            .with_capabilities(options.capabilities)
            .with_request_timeout(options.request_timeout);
        Self {
            session: Arc::new(Session::new(transport, config)),
        }
    }

    /// Connect the transport and run the initialize handshake. On success the
    /// session is `Ready`; on version mismatch or any handshake failure the
    /// session is closed and the error is returned.
    pub async fn connect(&self) -> McpResult<InitializeResult> {
        self.session.connect_transport().await?;
        self.session.initialize_client().await
    }

    /// Orderly shutdown. Pending requests are cancelled with a
    /// transport-closed error.
    pub async fn disconnect(&self) -> McpResult<()> {
        self.session.close().await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The server capabilities negotiated at initialize.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.session.server_capabilities()
    }

    /// The server's identity from the handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.session.peer_info()
    }

    /// The server's optional usage instructions from the handshake.
    pub fn instructions(&self) -> Option<String> {
        self.session.instructions()
    }

    /// The underlying session, for operations the facade does not cover.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Ask the server to abandon one of our in-flight requests.
    pub async fn cancel_request(
        &self,
        id: RequestId,
        reason: Option<String>,
    ) -> McpResult<()> {
        self.session.cancel_request(id, reason).await
    }

    // ------------------------------------------------------------------
    // observers
    // ------------------------------------------------------------------

    /// Observe errors the dispatch loop absorbs (malformed frames, failing
    /// observers, transport trouble).
    pub fn on_error(&self, handler: impl Fn(&McpError) + Send + Sync + 'static) -> Subscription {
        self.session.on_error(handler)
    }

    /// Observe resource list changes.
    pub fn on_resource_list_changed(
        &self,
        observer: impl Fn() -> McpResult<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.session
            .router()
            .on_resource_list_changed(Arc::new(move |_: &()| observer()))
    }

    /// Observe created sampling messages.
    pub fn on_message_created(
        &self,
        observer: impl Fn(&SamplingMessage) -> McpResult<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.session.router().on_message_created(Arc::new(observer))
    }

    /// Observe roots list changes.
    pub fn on_roots_changed(
        &self,
        observer: impl Fn(&[Root]) -> McpResult<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.session
            .router()
            .on_roots_changed(Arc::new(move |roots: &Vec<Root>| observer(roots)))
    }

    /// Observe server log messages that pass the server's threshold.
    pub fn on_log_message(
        &self,
        observer: impl Fn(&LogMessageParams) -> McpResult<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.session.router().on_log_message(Arc::new(observer))
    }

    /// Observe notifications with no built-in route.
    pub fn on_notification(
        &self,
        observer: impl Fn(&JsonRpcNotification) -> McpResult<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.session.router().on_notification(Arc::new(observer))
    }

    // ------------------------------------------------------------------
    // capability gating
    // ------------------------------------------------------------------

    pub(crate) fn require(
        &self,
        gate: fn(&ServerCapabilities) -> bool,
        what: &str,
    ) -> McpResult<()> {
        let caps = self
            .session
            .server_capabilities()
            .ok_or_else(|| McpError::not_initialized("Client is not connected"))?;
        if gate(&caps) {
            Ok(())
        } else {
            Err(McpError::request_failed(format!(
                "Server does not support {what}"
            )))
        }
    }
}
