//! The session engine.
//!
//! One [`Session`] runs per transport, on each peer. Its dispatch loop is a
//! single consumer task fed by the transport's message subscription, so one
//! inbound frame is dispatched to completion before the next: a correlated
//! response settles its pending awaiter, a notification goes through the
//! router, an inbound request goes to the role's dispatcher. Malformed frames
//! never reach the loop; transports report them through error subscribers and
//! the loop survives.
//!
//! Outbound requests allocate monotonically increasing ids that are never
//! reused for the session's lifetime. The pending entry is inserted before
//! the frame is handed to the transport, so a response can never arrive ahead
//! of its deadline timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use duplexmcp_protocol::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload,
};
use duplexmcp_protocol::types::{
    CancelledParams, ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    LogMessageParams, MessageCreatedParams, ProgressParams, ResourceUpdatedParams,
    RootsChangedParams, ServerCapabilities,
};
use duplexmcp_protocol::{
    LATEST_PROTOCOL_VERSION, McpError, McpResult, ProgressToken, RequestId, codec, methods,
};
use duplexmcp_transport::{SubscriberSet, Subscription, Transport, TransportError};

use crate::pending::{PendingTable, ProgressRegistry, ProgressSink};
use crate::router::NotificationRouter;
use crate::state::SessionState;

/// Which facade drives this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Initiates the handshake; inbound requests answer `ping` only.
    Client,
    /// Answers the handshake; inbound requests go to the installed
    /// [`RequestDispatcher`].
    Server,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Role of this peer
    pub role: SessionRole,
    /// This peer's identity, sent during the handshake
    pub info: Implementation,
    /// Capabilities advertised by a client-role session
    pub capabilities: ClientCapabilities,
    /// Deadline for every outbound request
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Default request deadline.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Client-role configuration with defaults.
    pub fn client(info: Implementation) -> Self {
        Self {
            role: SessionRole::Client,
            info,
            capabilities: ClientCapabilities::default(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Server-role configuration with defaults.
    pub fn server(info: Implementation) -> Self {
        Self {
            role: SessionRole::Server,
            info,
            capabilities: ClientCapabilities::default(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the advertised client capabilities.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// The seam a server facade plugs into the engine.
///
/// The engine intercepts `initialize` and readiness gating itself; the
/// dispatcher sees only well-formed traffic. A returned error becomes the
/// error object of the response frame.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Answer the initialize handshake.
    async fn initialize(&self, params: InitializeRequestParams) -> McpResult<InitializeResult>;

    /// Handle one inbound request.
    async fn dispatch(&self, method: &str, params: Option<Value>) -> McpResult<Value>;

    /// The session closed; drop any per-session state.
    fn on_close(&self) {}
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    pending: PendingTable,
    progress: ProgressRegistry,
    router: NotificationRouter,
    errors: SubscriberSet<McpError>,
    next_id: AtomicI64,
    initialized_sent: AtomicBool,
    peer_initialized: AtomicBool,
    server_capabilities: Mutex<Option<ServerCapabilities>>,
    peer_info: Mutex<Option<Implementation>>,
    instructions: Mutex<Option<String>>,
    dispatcher: Mutex<Option<Arc<dyn RequestDispatcher>>>,
    loop_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    transport_subs: Mutex<Vec<Subscription>>,
}

/// The symmetric session engine. See the module docs for the dispatch model.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.config.role)
            .field("state", &*self.inner.state.lock())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session over `transport`. Nothing flows until
    /// [`connect_transport`](Session::connect_transport) is called.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                config,
                state: Mutex::new(SessionState::Disconnected),
                pending: PendingTable::new(),
                progress: ProgressRegistry::new(),
                router: NotificationRouter::new(),
                errors: SubscriberSet::new(),
                next_id: AtomicI64::new(1),
                initialized_sent: AtomicBool::new(false),
                peer_initialized: AtomicBool::new(false),
                server_capabilities: Mutex::new(None),
                peer_info: Mutex::new(None),
                instructions: Mutex::new(None),
                dispatcher: Mutex::new(None),
                loop_task: Mutex::new(None),
                transport_subs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Install the inbound-request dispatcher (server facade).
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn RequestDispatcher>) {
        *self.inner.dispatcher.lock() = Some(dispatcher);
    }

    /// Connect the transport and start the dispatch loop. Leaves the session
    /// in `Initializing`: a client-role session then runs
    /// [`initialize_client`](Session::initialize_client); a server-role
    /// session waits for the peer's handshake.
    pub async fn connect_transport(&self) -> McpResult<()> {
        self.inner.set_state(SessionState::Connecting)?;
        if let Err(e) = self.inner.transport.connect().await {
            self.inner.finish_close("transport connect failed");
            return Err(e.into());
        }
        self.inner.install_handlers();
        self.inner.set_state(SessionState::Initializing)?;
        debug!(role = ?self.inner.config.role, "session transport connected");
        Ok(())
    }

    /// Run the client side of the initialize handshake.
    ///
    /// Sends `initialize`, verifies the protocol version, caches the server's
    /// capabilities for the rest of the session, enters `Ready`, and delivers
    /// the `initialized` notification exactly once (best-effort). Any failure
    /// closes the session.
    pub async fn initialize_client(&self) -> McpResult<InitializeResult> {
        if self.inner.config.role != SessionRole::Client {
            return Err(McpError::internal(
                "initialize_client called on a server-role session",
            ));
        }
        self.ensure_sendable(methods::INITIALIZE)?;

        let params = InitializeRequestParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.inner.config.capabilities.clone(),
            client_info: self.inner.config.info.clone(),
        };
        let raw = match self
            .request_internal(methods::INITIALIZE, Some(serde_json::to_value(params)?), None)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.abort_connect().await;
                return Err(e);
            }
        };
        let init: InitializeResult = match serde_json::from_value(raw) {
            Ok(init) => init,
            Err(e) => {
                self.abort_connect().await;
                return Err(McpError::invalid_request(format!(
                    "Malformed initialize result: {e}"
                )));
            }
        };
        if init.protocol_version != LATEST_PROTOCOL_VERSION {
            self.abort_connect().await;
            return Err(McpError::request_failed(format!(
                "Protocol version mismatch: expected {LATEST_PROTOCOL_VERSION}, got {}",
                init.protocol_version
            )));
        }

        *self.inner.server_capabilities.lock() = Some(init.capabilities.clone());
        *self.inner.peer_info.lock() = Some(init.server_info.clone());
        *self.inner.instructions.lock() = init.instructions.clone();
        self.inner.set_state(SessionState::Ready)?;
        debug!(server = %init.server_info.name, "session ready");

        if !self.inner.initialized_sent.swap(true, Ordering::SeqCst) {
            // Best-effort by contract.
            if let Err(e) = self.notify(methods::NOTIF_INITIALIZED, None).await {
                debug!(error = %e, "failed to deliver initialized notification");
            }
        }
        Ok(init)
    }

    /// Send a request and await its settlement.
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.ensure_sendable(method)?;
        self.request_internal(method, params, None).await
    }

    /// Send a request with an attached progress sink. A fresh progress token
    /// is injected at `params._meta.progressToken`; the sink receives
    /// `(progress, total?)` updates in wire order until the request settles.
    pub async fn request_with_progress(
        &self,
        method: &str,
        params: Option<Value>,
        sink: ProgressSink,
    ) -> McpResult<Value> {
        self.ensure_sendable(method)?;
        self.request_internal(method, params, Some(sink)).await
    }

    /// Send a notification. Requires `Ready`.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        if !self.inner.state.lock().is_ready() {
            return Err(McpError::not_initialized(format!(
                "Cannot send '{method}' notification while session is {}",
                self.state()
            )));
        }
        self.inner
            .transport
            .send(JsonRpcNotification::new(method, params).into())
            .await
            .map_err(Into::into)
    }

    /// Ask the peer to abandon one of our in-flight requests. The local
    /// awaiter is not settled here; it settles when the peer replies (or the
    /// deadline fires).
    pub async fn cancel_request(&self, id: RequestId, reason: Option<String>) -> McpResult<()> {
        let params = serde_json::to_value(CancelledParams {
            request_id: id,
            reason,
        })?;
        self.notify(methods::NOTIF_CANCELLED, Some(params)).await
    }

    /// Orderly shutdown: `Closing`, a best-effort `disconnect` signal from
    /// server-role sessions, transport teardown, then `Closed` (which cancels
    /// all pending awaiters and clears the observer registries).
    pub async fn close(&self) -> McpResult<()> {
        match self.state() {
            SessionState::Closed => return Ok(()),
            SessionState::Disconnected => return self.inner.set_state(SessionState::Closed),
            _ => {
                // A concurrent close may already be past Closing; the
                // teardown below is idempotent either way.
                let _ = self.inner.set_state(SessionState::Closing);
            }
        }
        if self.inner.config.role == SessionRole::Server && self.inner.transport.is_connected() {
            let signal = JsonRpcNotification::new(methods::NOTIF_DISCONNECT, None);
            if let Err(e) = self.inner.transport.send(signal.into()).await {
                trace!(error = %e, "disconnect signal not delivered");
            }
        }
        let _ = self.inner.transport.disconnect().await;
        self.inner.finish_close("session closed");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// True once arbitrary methods may flow.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// This session's role.
    pub fn role(&self) -> SessionRole {
        self.inner.config.role
    }

    /// The server capabilities negotiated at initialize (client role).
    /// Immutable for the session's lifetime once `Ready`.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.server_capabilities.lock().clone()
    }

    /// The peer's identity from the handshake.
    pub fn peer_info(&self) -> Option<Implementation> {
        self.inner.peer_info.lock().clone()
    }

    /// The server's optional instructions from the handshake.
    pub fn instructions(&self) -> Option<String> {
        self.inner.instructions.lock().clone()
    }

    /// Observer registries for routed notifications.
    pub fn router(&self) -> &NotificationRouter {
        &self.inner.router
    }

    /// Observe protocol and transport errors the dispatch loop absorbs.
    pub fn on_error(&self, handler: impl Fn(&McpError) + Send + Sync + 'static) -> Subscription {
        self.inner.errors.subscribe_fn(handler)
    }

    /// Number of in-flight outbound requests.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn ensure_sendable(&self, method: &str) -> McpResult<()> {
        let state = self.state();
        match state {
            SessionState::Ready => Ok(()),
            SessionState::Initializing if method == methods::INITIALIZE => Ok(()),
            other => Err(McpError::not_initialized(format!(
                "Cannot send '{method}' request while session is {other}"
            ))),
        }
    }

    async fn request_internal(
        &self,
        method: &str,
        mut params: Option<Value>,
        sink: Option<ProgressSink>,
    ) -> McpResult<Value> {
        if let Some(p) = &params {
            codec::validate_request_meta(p)?;
        }

        let id_value = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let id = RequestId::Number(id_value);
        let token = match sink {
            Some(sink) => {
                let token = ProgressToken::Number(id_value);
                params = Some(attach_progress_token(params, &token)?);
                self.inner.progress.register(token.clone(), sink);
                Some(token)
            }
            None => None,
        };

        let (tx, rx) = oneshot::channel();
        // Insert before send: the entry must be in the table before the frame
        // can produce a response.
        if let Err(e) = self.inner.pending.insert(id.clone(), tx, token.clone()) {
            self.inner.discard_request(&id, token.as_ref());
            return Err(e);
        }

        let frame = JsonRpcRequest::new(id.clone(), method, params);
        trace!(%id, method, "sending request");
        if let Err(e) = self.inner.transport.send(frame.into()).await {
            self.inner.discard_request(&id, token.as_ref());
            return Err(e.into());
        }

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::request_failed(
                "Transport closed before a response arrived",
            )),
            Err(_) => {
                // No cancellation notification goes out; a late response for
                // this id is silently discarded.
                self.inner.discard_request(&id, token.as_ref());
                Err(McpError::request_failed(format!(
                    "Request timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn abort_connect(&self) {
        let _ = self.inner.transport.disconnect().await;
        self.inner.finish_close("initialize failed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.finish_close("session dropped");
    }
}

impl SessionInner {
    /// The single gate for every state mutation: refuses any move the
    /// lifecycle diagram in [`SessionState`] does not allow.
    fn set_state(&self, next: SessionState) -> McpResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(McpError::request_failed(format!(
                "Invalid session state transition: {} -> {next}",
                *state
            )));
        }
        trace!(from = %*state, to = %next, "session state transition");
        *state = next;
        Ok(())
    }

    fn install_handlers(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        let sub_messages = self.transport.subscribe_messages(Arc::new(move |message| {
            let _ = tx.send(message.clone());
        }));
        let weak = Arc::downgrade(self);
        let sub_errors = self.transport.subscribe_errors(Arc::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_transport_error(error);
            }
        }));
        self.transport_subs
            .lock()
            .extend([sub_messages, sub_errors]);

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                inner.dispatch_inbound(message).await;
            }
            trace!("session dispatch loop ended");
        });
        *self.loop_task.lock() = Some(task);
    }

    fn handle_transport_error(&self, error: &TransportError) {
        let fatal = matches!(error, TransportError::Closed(_));
        self.errors.emit(&McpError::from(error.clone()));
        if fatal && !self.state.lock().is_closed() {
            debug!(error = %error, "fatal transport error; closing session");
            self.finish_close("fatal transport error");
        }
    }

    /// Enter `Closed`: cancel every pending awaiter with a transport-closed
    /// error, then clear the pending table and every observer registry.
    fn finish_close(&self, reason: &str) {
        // Closed is terminal, so a second close loses the transition race
        // and there is nothing left to tear down.
        if self.set_state(SessionState::Closed).is_err() {
            return;
        }
        if let Some(task) = self.loop_task.lock().take() {
            task.abort();
        }
        for sub in self.transport_subs.lock().drain(..) {
            sub.unsubscribe();
        }

        let entries = self.pending.drain();
        if !entries.is_empty() {
            debug!(count = entries.len(), "cancelling pending requests on close");
        }
        for entry in entries {
            if let Some(token) = &entry.progress_token {
                self.progress.unregister(token);
            }
            let _ = entry
                .tx
                .send(Err(McpError::request_failed(format!(
                    "Transport closed: {reason}"
                ))));
        }

        self.progress.clear();
        self.router.clear();
        let dispatcher = self.dispatcher.lock().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.on_close();
        }
        debug!(reason, "session closed");
    }

    fn discard_request(&self, id: &RequestId, token: Option<&ProgressToken>) {
        self.pending.remove(id);
        if let Some(token) = token {
            self.progress.unregister(token);
        }
    }

    async fn dispatch_inbound(self: &Arc<Self>, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.handle_response(response),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
            JsonRpcMessage::Request(request) => self.handle_request(request).await,
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_request_id().cloned() else {
            // A null-id error response reports a frame the peer could not
            // parse; there is nothing to settle.
            if let Some(error) = response.error_object() {
                self.errors.emit(&McpError::from(error.clone()));
            }
            return;
        };
        let Some(entry) = self.pending.remove(&id) else {
            trace!(%id, "response for unknown or settled request discarded");
            return;
        };
        // Deregister the sink before settling so the caller observes no
        // progress after resolution.
        if let Some(token) = &entry.progress_token {
            self.progress.unregister(token);
        }
        let outcome = match response.payload {
            JsonRpcResponsePayload::Success { result } => Ok(result),
            JsonRpcResponsePayload::Error { error } => Err(McpError::from(error)),
        };
        let _ = entry.tx.send(outcome);
    }

    async fn handle_notification(self: &Arc<Self>, notification: JsonRpcNotification) {
        let params = notification.params.clone().unwrap_or(Value::Null);
        match notification.method.as_str() {
            methods::NOTIF_PROGRESS => match serde_json::from_value::<ProgressParams>(params) {
                Ok(p) => {
                    if let Some(sink) = self.progress.get(&p.progress_token) {
                        sink(p.progress, p.total);
                    } else {
                        trace!(token = %p.progress_token, "progress for settled request ignored");
                    }
                }
                Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                    "Malformed progress notification: {e}"
                ))),
            },
            methods::NOTIF_CANCELLED => match serde_json::from_value::<CancelledParams>(params) {
                Ok(p) => self.cancel_pending(&p.request_id, p.reason.as_deref()),
                Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                    "Malformed cancellation notification: {e}"
                ))),
            },
            methods::NOTIF_RESOURCE_UPDATED | methods::NOTIF_RESOURCE_CHANGED => {
                match serde_json::from_value::<ResourceUpdatedParams>(params) {
                    Ok(p) => self.router.emit_resource_updated(&p, &self.errors),
                    Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                        "Malformed resource update notification: {e}"
                    ))),
                }
            }
            methods::NOTIF_RESOURCES_LIST_CHANGED => {
                self.router.emit_resource_list_changed(&self.errors);
            }
            methods::NOTIF_MESSAGE_CREATED => {
                match serde_json::from_value::<MessageCreatedParams>(params) {
                    Ok(p) => self.router.emit_message_created(&p.message, &self.errors),
                    Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                        "Malformed messageCreated notification: {e}"
                    ))),
                }
            }
            methods::NOTIF_ROOTS_CHANGED => {
                match serde_json::from_value::<RootsChangedParams>(params) {
                    Ok(p) => self.router.emit_roots_changed(&p.roots, &self.errors),
                    Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                        "Malformed rootsChanged notification: {e}"
                    ))),
                }
            }
            methods::NOTIF_MESSAGE => match serde_json::from_value::<LogMessageParams>(params) {
                Ok(p) => self.router.emit_log_message(&p, &self.errors),
                Err(e) => self.errors.emit(&McpError::invalid_params(format!(
                    "Malformed log notification: {e}"
                ))),
            },
            methods::NOTIF_INITIALIZED => {
                if self.config.role == SessionRole::Server {
                    self.peer_initialized.store(true, Ordering::SeqCst);
                    match self.set_state(SessionState::Ready) {
                        Ok(()) => debug!("peer initialized; session ready"),
                        Err(_) => trace!("redundant initialized notification ignored"),
                    }
                } else {
                    self.router.emit_generic(&notification, &self.errors);
                }
            }
            methods::NOTIF_DISCONNECT => {
                debug!("peer sent disconnect signal");
                let _ = self.transport.disconnect().await;
                self.finish_close("peer disconnected");
            }
            _ => self.router.emit_generic(&notification, &self.errors),
        }
    }

    fn cancel_pending(&self, id: &RequestId, reason: Option<&str>) {
        let Some(entry) = self.pending.remove(id) else {
            trace!(%id, "cancellation for unknown request ignored");
            return;
        };
        if let Some(token) = &entry.progress_token {
            self.progress.unregister(token);
        }
        let reason = reason.unwrap_or("No reason provided");
        let _ = entry
            .tx
            .send(Err(McpError::request_failed(format!(
                "Request cancelled: {reason}"
            ))));
    }

    async fn handle_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let outcome = self.route_request(&method, params).await;
        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                debug!(%method, error = %e, "inbound request failed");
                JsonRpcResponse::error(id, e.to_json_rpc())
            }
        };
        if let Err(e) = self.transport.send(response.into()).await {
            warn!(error = %e, "failed to deliver response");
            self.errors.emit(&e.into());
        }
    }

    async fn route_request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        if method == methods::INITIALIZE {
            let dispatcher = self
                .dispatcher
                .lock()
                .clone()
                .ok_or_else(|| McpError::method_not_found(method))?;
            let params: InitializeRequestParams =
                serde_json::from_value(params.unwrap_or_else(|| json!({}))).map_err(|e| {
                    McpError::invalid_params(format!("Malformed initialize params: {e}"))
                })?;
            let result = dispatcher.initialize(params).await?;
            return Ok(serde_json::to_value(result)?);
        }

        // Nothing but initialize may be processed before both peers finished
        // the handshake.
        let ready = match self.config.role {
            SessionRole::Server => self.peer_initialized.load(Ordering::SeqCst),
            SessionRole::Client => self.state.lock().is_ready(),
        };
        if !ready {
            return Err(McpError::not_initialized(format!(
                "Received '{method}' before initialization completed"
            )));
        }

        if method == methods::PING {
            return Ok(json!({}));
        }

        let dispatcher = self.dispatcher.lock().clone();
        match dispatcher {
            Some(dispatcher) => dispatcher.dispatch(method, params).await,
            None => Err(McpError::method_not_found(method)),
        }
    }
}

/// Merge a fresh progress token into `params._meta.progressToken`.
fn attach_progress_token(params: Option<Value>, token: &ProgressToken) -> McpResult<Value> {
    let mut obj = match params {
        None => serde_json::Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(McpError::validation(
                "Request params must be an object to carry a progress token",
            ));
        }
    };
    let meta = obj
        .entry("_meta".to_string())
        .or_insert_with(|| json!({}));
    let meta_obj = meta
        .as_object_mut()
        .ok_or_else(|| McpError::invalid_request("params._meta must be an object"))?;
    meta_obj.insert("progressToken".to_string(), serde_json::to_value(token)?);
    Ok(Value::Object(obj))
}
