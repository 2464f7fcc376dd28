//! Handler traits and registry records.
//!
//! Handlers are async trait objects; plain async closures satisfy them
//! through blanket impls, so registration reads naturally:
//!
//! ```rust,ignore
//! server.register_tool(tool, |args, _ctx| async move { Ok(json!({"ok": true})) }).await?;
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use parking_lot::Mutex;
use serde_json::Value;

use duplexmcp_protocol::McpResult;
use duplexmcp_protocol::types::{
    CreateMessageParams, CreateMessageResult, GetPromptResult, LoggingLevel, Prompt,
    ReadResourceResult, Resource, ResourceContents, Root, Tool,
};

use crate::server::ProgressReporter;

/// Per-invocation context handed to tool handlers.
#[derive(Default)]
pub struct ToolContext {
    pub(crate) progress: Option<ProgressReporter>,
}

impl ToolContext {
    /// Progress reporter for this invocation, present when the caller
    /// attached a progress token to the request.
    pub fn progress(&self) -> Option<&ProgressReporter> {
        self.progress.as_ref()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// Executes one registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with validated arguments.
    async fn call(&self, arguments: HashMap<String, Value>, ctx: ToolContext)
    -> McpResult<Value>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub(crate) struct FnTool<F>(pub(crate) F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(HashMap<String, Value>, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    async fn call(
        &self,
        arguments: HashMap<String, Value>,
        ctx: ToolContext,
    ) -> McpResult<Value> {
        (self.0)(arguments, ctx).await
    }
}

/// Renders (and optionally executes) one registered prompt. Required
/// arguments are already checked when a handler runs.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Render the prompt into messages (`prompts/get`).
    async fn render(&self, arguments: HashMap<String, Value>) -> McpResult<GetPromptResult>;

    /// Execute the prompt (`prompts/execute`). Defaults to returning the
    /// rendered form.
    async fn execute(&self, arguments: HashMap<String, Value>) -> McpResult<Value> {
        let rendered = self.render(arguments).await?;
        Ok(serde_json::to_value(rendered)?)
    }
}

/// Adapter turning an async closure into a [`PromptHandler`].
pub(crate) struct FnPrompt<F>(pub(crate) F);

#[async_trait]
impl<F, Fut> PromptHandler for FnPrompt<F>
where
    F: Fn(HashMap<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<GetPromptResult>> + Send,
{
    async fn render(&self, arguments: HashMap<String, Value>) -> McpResult<GetPromptResult> {
        (self.0)(arguments).await
    }
}

/// Handles one custom method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method with its raw params.
    async fn handle(&self, params: Option<Value>) -> McpResult<Value>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub(crate) struct FnMethod<F>(pub(crate) F);

#[async_trait]
impl<F, Fut> MethodHandler for FnMethod<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    async fn handle(&self, params: Option<Value>) -> McpResult<Value> {
        (self.0)(params).await
    }
}

/// Produces the contents of a registered resource on `resources/read`.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    /// Read the resource's current contents.
    async fn read(&self, resource: &Resource) -> McpResult<ReadResourceResult>;
}

/// Reader serving a fixed text body.
pub(crate) struct StaticTextReader(pub(crate) String);

#[async_trait]
impl ResourceReader for StaticTextReader {
    async fn read(&self, resource: &Resource) -> McpResult<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                resource.uri.clone(),
                Some(resource.mime_type.clone()),
                self.0.clone(),
            )],
        })
    }
}

/// Brokers `sampling/createMessage`.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    /// Produce a completion for the request.
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult>;
}

#[derive(Clone)]
pub(crate) struct RegisteredTool {
    pub(crate) tool: Tool,
    pub(crate) validator: Option<Arc<Validator>>,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

#[derive(Clone)]
pub(crate) struct RegisteredPrompt {
    pub(crate) prompt: Prompt,
    pub(crate) handler: Arc<dyn PromptHandler>,
}

#[derive(Clone)]
pub(crate) struct RegisteredResource {
    pub(crate) resource: Resource,
    pub(crate) reader: Option<Arc<dyn ResourceReader>>,
}

/// All server-side registries. Locks are short-lived and never held across
/// an await.
#[derive(Default)]
pub(crate) struct ServerRegistries {
    pub(crate) tools: Mutex<BTreeMap<String, RegisteredTool>>,
    pub(crate) prompts: Mutex<BTreeMap<String, RegisteredPrompt>>,
    pub(crate) resources: Mutex<BTreeMap<String, RegisteredResource>>,
    pub(crate) subscriptions: Mutex<BTreeSet<String>>,
    pub(crate) methods: Mutex<HashMap<String, Arc<dyn MethodHandler>>>,
    pub(crate) roots: Mutex<Vec<Root>>,
    pub(crate) logging_level: Mutex<LoggingLevel>,
    pub(crate) sampling: Mutex<Option<Arc<dyn SamplingHandler>>>,
}

impl ServerRegistries {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Clear peer-scoped state when a session ends. Registered features
    /// survive; the subscription set does not.
    pub(crate) fn reset_session_state(&self) {
        self.subscriptions.lock().clear();
    }
}
