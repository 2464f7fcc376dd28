//! The server facade and its request dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use duplexmcp_protocol::types::{
    ClientCapabilities, CreateMessageParams, ExecuteToolParams, GetPromptParams,
    GetPromptResult, Implementation, InitializeRequestParams, InitializeResult,
    ListPromptsResult, ListResourcesResult, ListRootsResult, ListToolsResult, LogMessageParams,
    LoggingCapability, LoggingLevel, MessageCreatedParams, Prompt, PromptsCapability,
    ProgressParams, Resource, ResourceUpdatedParams, ResourceUriParams, ResourcesCapability,
    Root, RootsCapability, SamplingCapability, SamplingMessage, ServerCapabilities,
    SetLevelParams, Tool, ToolsCapability,
};
use duplexmcp_protocol::{
    ErrorKind, LATEST_PROTOCOL_VERSION, McpError, McpResult, ProgressToken, methods,
};
use duplexmcp_session::{RequestDispatcher, Session, SessionConfig, SessionState};
use duplexmcp_transport::{Subscription, Transport};

use crate::registry::{
    FnMethod, FnPrompt, FnTool, MethodHandler, PromptHandler, RegisteredPrompt,
    RegisteredResource, RegisteredTool, ResourceReader, SamplingHandler, ServerRegistries,
    StaticTextReader, ToolContext, ToolHandler,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Identity returned in the initialize result
    pub info: Implementation,
    /// Optional usage guidance returned in the initialize result
    pub instructions: Option<String>,
    /// Explicit capabilities. When `None`, capabilities are derived from the
    /// registries at handshake time (tools present → tools.listChanged, and
    /// so on; logging is always derived).
    pub capabilities: Option<ServerCapabilities>,
    /// Deadline for requests this server initiates
    pub request_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            info: Implementation::new("duplexmcp-server", env!("CARGO_PKG_VERSION")),
            instructions: None,
            capabilities: None,
            request_timeout: SessionConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Sends `notifications/progress` frames for one in-flight inbound request.
/// Handed to tool handlers whose caller attached a progress token.
#[derive(Clone)]
pub struct ProgressReporter {
    session: Weak<Session>,
    token: ProgressToken,
}

impl ProgressReporter {
    /// Emit one `(progress, total?)` update.
    pub async fn report(&self, progress: f64, total: Option<f64>) -> McpResult<()> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| McpError::request_failed("Session is gone"))?;
        let params = serde_json::to_value(ProgressParams {
            progress_token: self.token.clone(),
            progress,
            total,
        })?;
        session.notify(methods::NOTIF_PROGRESS, Some(params)).await
    }

    /// The token this reporter is bound to.
    pub fn token(&self) -> &ProgressToken {
        &self.token
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

struct ServerState {
    options: ServerOptions,
    registries: ServerRegistries,
    session: Mutex<Option<Weak<Session>>>,
    client_info: Mutex<Option<Implementation>>,
    client_capabilities: Mutex<Option<ClientCapabilities>>,
}

impl ServerState {
    fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().as_ref().and_then(Weak::upgrade)
    }

    fn weak_session(&self) -> Weak<Session> {
        self.session.lock().clone().unwrap_or_default()
    }

    fn effective_capabilities(&self) -> ServerCapabilities {
        if let Some(explicit) = &self.options.capabilities {
            return explicit.clone();
        }
        ServerCapabilities {
            experimental: None,
            logging: Some(LoggingCapability {}),
            prompts: (!self.registries.prompts.lock().is_empty()).then(|| PromptsCapability {
                list_changed: Some(true),
            }),
            resources: (!self.registries.resources.lock().is_empty()).then(|| {
                ResourcesCapability {
                    subscribe: Some(true),
                    list_changed: Some(true),
                }
            }),
            tools: (!self.registries.tools.lock().is_empty()).then(|| ToolsCapability {
                list_changed: Some(true),
            }),
            sampling: self.registries.sampling.lock().is_some().then(|| {
                SamplingCapability {
                    create_message: Some(true),
                }
            }),
            roots: (!self.registries.roots.lock().is_empty()).then(|| RootsCapability {
                list_changed: Some(true),
            }),
        }
    }
}

/// An MCP server over one transport.
///
/// Register features, [`connect`](Server::connect), and the session engine
/// takes over: the handshake is answered with this server's (derived or
/// explicit) capabilities, and every later request is routed through the
/// registries. Registry mutations while the session is ready fire the
/// matching change notifications.
pub struct Server {
    session: Arc<Session>,
    state: Arc<ServerState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.session.state())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server over `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: ServerOptions) -> Self {
        let session = Arc::new(Session::new(
            transport,
            SessionConfig::server(options.info.clone())
                .with_request_timeout(options.request_timeout),
        ));
        let state = Arc::new(ServerState {
            options,
            registries: ServerRegistries::new(),
            session: Mutex::new(Some(Arc::downgrade(&session))),
            client_info: Mutex::new(None),
            client_capabilities: Mutex::new(None),
        });
        session.set_dispatcher(Arc::new(ServerDispatcher {
            state: Arc::clone(&state),
        }));
        Self { session, state }
    }

    /// Connect the transport and start serving. The session becomes `Ready`
    /// once the peer completes the handshake and sends
    /// `notifications/initialized`.
    pub async fn connect(&self) -> McpResult<()> {
        self.session.connect_transport().await
    }

    /// Orderly shutdown: a best-effort `disconnect` signal, transport
    /// teardown, pending awaiters cancelled.
    pub async fn close(&self) -> McpResult<()> {
        self.session.close().await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The connected client's identity, once the handshake ran.
    pub fn client_info(&self) -> Option<Implementation> {
        self.state.client_info.lock().clone()
    }

    /// The connected client's capabilities, once the handshake ran.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.state.client_capabilities.lock().clone()
    }

    /// Observe errors the dispatch loop absorbs.
    pub fn on_error(&self, handler: impl Fn(&McpError) + Send + Sync + 'static) -> Subscription {
        self.session.on_error(handler)
    }

    // ------------------------------------------------------------------
    // registries
    // ------------------------------------------------------------------

    /// Register (or replace) a tool backed by an async closure. A non-trivial
    /// `inputSchema` is compiled once here; invocations validate against it
    /// before the handler runs.
    pub async fn register_tool<F, Fut>(&self, tool: Tool, handler: F) -> McpResult<()>
    where
        F: Fn(HashMap<String, Value>, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.register_tool_handler(tool, FnTool(handler)).await
    }

    /// Register (or replace) a tool backed by a [`ToolHandler`] impl.
    pub async fn register_tool_handler<H>(&self, tool: Tool, handler: H) -> McpResult<()>
    where
        H: ToolHandler + 'static,
    {
        let validator = if tool.input_schema.is_null() {
            None
        } else {
            Some(Arc::new(jsonschema::validator_for(&tool.input_schema).map_err(
                |e| {
                    McpError::validation(format!(
                        "Invalid input schema for tool '{}': {e}",
                        tool.name
                    ))
                },
            )?))
        };
        self.state.registries.tools.lock().insert(
            tool.name.clone(),
            RegisteredTool {
                tool,
                validator,
                handler: Arc::new(handler),
            },
        );
        self.notify_if_ready(methods::NOTIF_TOOLS_LIST_CHANGED, None).await;
        Ok(())
    }

    /// Remove a tool. Returns whether it existed.
    pub async fn remove_tool(&self, name: &str) -> bool {
        let existed = self.state.registries.tools.lock().remove(name).is_some();
        if existed {
            self.notify_if_ready(methods::NOTIF_TOOLS_LIST_CHANGED, None).await;
        }
        existed
    }

    /// Register (or replace) a prompt backed by an async render closure.
    pub async fn register_prompt<F, Fut>(&self, prompt: Prompt, handler: F) -> McpResult<()>
    where
        F: Fn(HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = McpResult<GetPromptResult>> + Send + 'static,
    {
        self.register_prompt_handler(prompt, FnPrompt(handler)).await
    }

    /// Register (or replace) a prompt backed by a [`PromptHandler`] impl.
    pub async fn register_prompt_handler<H>(&self, prompt: Prompt, handler: H) -> McpResult<()>
    where
        H: PromptHandler + 'static,
    {
        self.state.registries.prompts.lock().insert(
            prompt.name.clone(),
            RegisteredPrompt {
                prompt,
                handler: Arc::new(handler),
            },
        );
        self.notify_if_ready(methods::NOTIF_PROMPTS_LIST_CHANGED, None).await;
        Ok(())
    }

    /// Register a custom method backed by an async closure. Duplicate
    /// registration is rejected.
    pub fn register_method<F, Fut>(&self, name: impl Into<String>, handler: F) -> McpResult<()>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.register_method_handler(name, FnMethod(handler))
    }

    /// Register a custom method backed by a [`MethodHandler`] impl.
    pub fn register_method_handler<H>(&self, name: impl Into<String>, handler: H) -> McpResult<()>
    where
        H: MethodHandler + 'static,
    {
        let name = name.into();
        let mut methods = self.state.registries.methods.lock();
        if methods.contains_key(&name) {
            return Err(McpError::validation(format!(
                "Method already registered: {name}"
            )));
        }
        methods.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Add a resource, or replace the one already registered at its uri.
    ///
    /// Emits `notifications/resources/list_changed`; when the uri existed,
    /// additionally emits `notifications/resources/updated` for it, in that
    /// order.
    pub async fn add_or_replace_resource(&self, resource: Resource) -> McpResult<()> {
        self.add_resource_inner(resource, None).await
    }

    /// Add or replace a resource with a contents reader for `resources/read`.
    pub async fn add_or_replace_resource_with_reader<R>(
        &self,
        resource: Resource,
        reader: R,
    ) -> McpResult<()>
    where
        R: ResourceReader + 'static,
    {
        self.add_resource_inner(resource, Some(Arc::new(reader))).await
    }

    /// Add or replace a resource serving a fixed text body.
    pub async fn add_or_replace_resource_with_text(
        &self,
        resource: Resource,
        text: impl Into<String>,
    ) -> McpResult<()> {
        self.add_resource_inner(resource, Some(Arc::new(StaticTextReader(text.into()))))
            .await
    }

    async fn add_resource_inner(
        &self,
        resource: Resource,
        reader: Option<Arc<dyn ResourceReader>>,
    ) -> McpResult<()> {
        url::Url::parse(&resource.uri).map_err(|e| {
            McpError::validation(format!("Resource uri '{}' is not a URI: {e}", resource.uri))
        })?;
        let uri = resource.uri.clone();
        let existed = self
            .state
            .registries
            .resources
            .lock()
            .insert(uri.clone(), RegisteredResource { resource, reader })
            .is_some();

        self.notify_if_ready(methods::NOTIF_RESOURCES_LIST_CHANGED, None).await;
        if existed {
            let params = serde_json::to_value(ResourceUpdatedParams { uri })?;
            self.notify_if_ready(methods::NOTIF_RESOURCE_UPDATED, Some(params)).await;
        }
        Ok(())
    }

    /// Remove a resource. Emits `list_changed` and drops the uri's
    /// subscribers. Returns whether it existed.
    pub async fn remove_resource(&self, uri: &str) -> bool {
        let existed = self.state.registries.resources.lock().remove(uri).is_some();
        if existed {
            self.state.registries.subscriptions.lock().remove(uri);
            self.notify_if_ready(methods::NOTIF_RESOURCES_LIST_CHANGED, None).await;
        }
        existed
    }

    /// Uris the connected client subscribed to.
    pub fn subscribed_uris(&self) -> Vec<String> {
        self.state
            .registries
            .subscriptions
            .lock()
            .iter()
            .cloned()
            .collect()
    }

    /// Replace the roots list and notify observers.
    pub async fn set_roots(&self, roots: Vec<Root>) -> McpResult<()> {
        *self.state.registries.roots.lock() = roots.clone();
        let params = json!({"roots": roots});
        self.notify_if_ready(methods::NOTIF_ROOTS_CHANGED, Some(params)).await;
        Ok(())
    }

    /// Install the sampling handler backing `sampling/createMessage`.
    pub fn set_sampling_handler<H>(&self, handler: H)
    where
        H: SamplingHandler + 'static,
    {
        *self.state.registries.sampling.lock() = Some(Arc::new(handler));
    }

    /// Current logging threshold.
    pub fn logging_level(&self) -> LoggingLevel {
        *self.state.registries.logging_level.lock()
    }

    /// Emit a `notifications/message` log frame, unless `level` falls below
    /// the client-set threshold.
    pub async fn log(
        &self,
        level: LoggingLevel,
        data: Value,
        logger: Option<String>,
    ) -> McpResult<()> {
        if level < self.logging_level() {
            return Ok(());
        }
        let params = serde_json::to_value(LogMessageParams {
            level,
            logger,
            data,
        })?;
        self.notify_if_ready(methods::NOTIF_MESSAGE, Some(params)).await;
        Ok(())
    }

    /// Best-effort notification: skipped silently before the session is
    /// ready, logged on delivery failure.
    async fn notify_if_ready(&self, method: &str, params: Option<Value>) {
        if !self.session.is_ready() {
            return;
        }
        if let Err(e) = self.session.notify(method, params).await {
            debug!(method, error = %e, "change notification not delivered");
        }
    }
}

struct ServerDispatcher {
    state: Arc<ServerState>,
}

/// Map a registered handler's error onto the JSON-RPC surface: explicit
/// validation failures become `InvalidParams` (details preserved),
/// `InvalidParams` passes through, anything else is an internal error.
fn map_handler_error(err: McpError) -> McpError {
    match err.kind {
        ErrorKind::Validation => {
            let mut mapped = McpError::invalid_params(err.message);
            mapped.data = err.data;
            mapped
        }
        ErrorKind::InvalidParams => err,
        _ => McpError::internal(err.message),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> McpResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| McpError::invalid_params(format!("Invalid params for {method}: {e}")))
}

/// Pull an optional progress token out of the reserved `_meta` slot. The
/// typed param structs ignore `_meta` entirely, so callers see only their
/// own arguments.
fn progress_token_of(params: &Option<Value>) -> Option<ProgressToken> {
    params
        .as_ref()?
        .get("_meta")?
        .get("progressToken")
        .cloned()
        .and_then(|raw| serde_json::from_value(raw).ok())
}

impl ServerDispatcher {
    async fn execute_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let token = progress_token_of(&params);
        let parsed: ExecuteToolParams = parse_params(methods::TOOLS_EXECUTE, params)?;
        let registered = self
            .state
            .registries
            .tools
            .lock()
            .get(&parsed.name)
            .cloned()
            .ok_or_else(|| {
                McpError::invalid_params(format!("Tool not found: {}", parsed.name))
            })?;

        let arguments = parsed.arguments.unwrap_or_default();
        if let Some(validator) = &registered.validator {
            let instance = serde_json::to_value(&arguments)?;
            let failures: Vec<String> = validator
                .iter_errors(&instance)
                .map(|e| e.to_string())
                .collect();
            if !failures.is_empty() {
                return Err(McpError::invalid_params(format!(
                    "Invalid params: {}",
                    failures.join("; ")
                ))
                .with_data(json!({"errors": failures})));
            }
        }

        let ctx = ToolContext {
            progress: token.map(|token| ProgressReporter {
                session: self.state.weak_session(),
                token,
            }),
        };
        registered
            .handler
            .call(arguments, ctx)
            .await
            .map_err(map_handler_error)
    }

    async fn prompt_request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> McpResult<Value> {
        let parsed: GetPromptParams = parse_params(method, params)?;
        let registered = self
            .state
            .registries
            .prompts
            .lock()
            .get(&parsed.name)
            .cloned()
            .ok_or_else(|| {
                McpError::invalid_params(format!("Prompt not found: {}", parsed.name))
            })?;

        let arguments = parsed.arguments.unwrap_or_default();
        for declared in registered.prompt.arguments.iter().flatten() {
            if declared.required == Some(true) && !arguments.contains_key(&declared.name) {
                return Err(McpError::invalid_params(format!(
                    "Missing required argument: {}",
                    declared.name
                )));
            }
        }

        if method == methods::PROMPTS_GET {
            let rendered = registered
                .handler
                .render(arguments)
                .await
                .map_err(map_handler_error)?;
            Ok(serde_json::to_value(rendered)?)
        } else {
            registered
                .handler
                .execute(arguments)
                .await
                .map_err(map_handler_error)
        }
    }

    async fn create_message(&self, params: Option<Value>) -> McpResult<Value> {
        let handler = self
            .state
            .registries
            .sampling
            .lock()
            .clone()
            .ok_or_else(|| McpError::method_not_found(methods::SAMPLING_CREATE_MESSAGE))?;
        let parsed: CreateMessageParams = parse_params(methods::SAMPLING_CREATE_MESSAGE, params)?;
        let result = handler
            .create_message(parsed)
            .await
            .map_err(map_handler_error)?;

        // Fan the created message out to observers on the other side.
        if let Some(session) = self.state.session() {
            let created = MessageCreatedParams {
                message: SamplingMessage {
                    role: result.role,
                    content: result.content.clone(),
                },
            };
            match serde_json::to_value(created) {
                Ok(params) => {
                    if let Err(e) = session
                        .notify(methods::NOTIF_MESSAGE_CREATED, Some(params))
                        .await
                    {
                        debug!(error = %e, "messageCreated notification not delivered");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode messageCreated"),
            }
        }
        Ok(serde_json::to_value(result)?)
    }
}

#[async_trait]
impl RequestDispatcher for ServerDispatcher {
    async fn initialize(&self, params: InitializeRequestParams) -> McpResult<InitializeResult> {
        debug!(client = %params.client_info.name, version = %params.protocol_version, "initialize received");
        *self.state.client_info.lock() = Some(params.client_info);
        *self.state.client_capabilities.lock() = Some(params.capabilities);

        Ok(InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.state.effective_capabilities(),
            server_info: self.state.options.info.clone(),
            instructions: self.state.options.instructions.clone(),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let registries = &self.state.registries;
        match method {
            methods::TOOLS_LIST => {
                let tools: Vec<Tool> = registries
                    .tools
                    .lock()
                    .values()
                    .map(|r| r.tool.clone())
                    .collect();
                Ok(serde_json::to_value(ListToolsResult { tools })?)
            }
            methods::TOOLS_EXECUTE => self.execute_tool(params).await,
            methods::PROMPTS_LIST => {
                let prompts: Vec<Prompt> = registries
                    .prompts
                    .lock()
                    .values()
                    .map(|r| r.prompt.clone())
                    .collect();
                Ok(serde_json::to_value(ListPromptsResult { prompts })?)
            }
            methods::PROMPTS_GET => self.prompt_request(methods::PROMPTS_GET, params).await,
            methods::PROMPTS_EXECUTE => {
                self.prompt_request(methods::PROMPTS_EXECUTE, params).await
            }
            methods::RESOURCES_LIST => {
                let resources: Vec<Resource> = registries
                    .resources
                    .lock()
                    .values()
                    .map(|r| r.resource.clone())
                    .collect();
                Ok(serde_json::to_value(ListResourcesResult { resources })?)
            }
            methods::RESOURCES_READ => {
                let parsed: ResourceUriParams = parse_params(method, params)?;
                let registered = registries
                    .resources
                    .lock()
                    .get(&parsed.uri)
                    .cloned()
                    .ok_or_else(|| {
                        McpError::invalid_params(format!("Resource not found: {}", parsed.uri))
                    })?;
                match &registered.reader {
                    Some(reader) => {
                        let contents = reader
                            .read(&registered.resource)
                            .await
                            .map_err(map_handler_error)?;
                        Ok(serde_json::to_value(contents)?)
                    }
                    None => Ok(json!({"contents": []})),
                }
            }
            methods::RESOURCES_SUBSCRIBE => {
                let parsed: ResourceUriParams = parse_params(method, params)?;
                if !registries.resources.lock().contains_key(&parsed.uri) {
                    return Err(McpError::invalid_params(format!(
                        "Resource not found: {}",
                        parsed.uri
                    )));
                }
                registries.subscriptions.lock().insert(parsed.uri);
                Ok(json!({}))
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                let parsed: ResourceUriParams = parse_params(method, params)?;
                registries.subscriptions.lock().remove(&parsed.uri);
                Ok(json!({}))
            }
            methods::LOGGING_SET_LEVEL => {
                let parsed: SetLevelParams = parse_params(method, params)?;
                *registries.logging_level.lock() = parsed.level;
                debug!(level = ?parsed.level, "logging threshold updated");
                Ok(json!({}))
            }
            methods::SAMPLING_CREATE_MESSAGE => self.create_message(params).await,
            methods::ROOTS_LIST => {
                let roots = registries.roots.lock().clone();
                Ok(serde_json::to_value(ListRootsResult { roots })?)
            }
            custom => {
                let handler = registries.methods.lock().get(custom).cloned();
                match handler {
                    Some(handler) => handler.handle(params).await.map_err(map_handler_error),
                    None => Err(McpError::method_not_found(custom)),
                }
            }
        }
    }

    fn on_close(&self) {
        self.state.registries.reset_session_state();
        *self.state.client_info.lock() = None;
        *self.state.client_capabilities.lock() = None;
    }
}
