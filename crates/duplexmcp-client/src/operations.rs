//! Capability-scoped convenience calls.
//!
//! Each operation enforces its required server capability, shapes the
//! params, and delegates to the session. Results are deserialized into
//! the typed protocol structs; a malformed result from the server surfaces as
//! `InvalidRequest` rather than a panic.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use duplexmcp_protocol::types::{
    CreateMessageParams, CreateMessageResult, ExecuteToolParams, GetPromptParams,
    GetPromptResult, ListPromptsResult, ListResourcesResult, ListRootsResult, ListToolsResult,
    LoggingLevel, Prompt, ReadResourceResult, Resource, ResourceUpdatedParams,
    ResourceUriParams, Root, ServerCapabilities, SetLevelParams, Tool,
};
use duplexmcp_protocol::{McpError, McpResult, methods};
use duplexmcp_session::ProgressSink;
use duplexmcp_transport::Subscription;

use crate::client::Client;

fn parse<T: serde::de::DeserializeOwned>(what: &str, raw: Value) -> McpResult<T> {
    serde_json::from_value(raw)
        .map_err(|e| McpError::invalid_request(format!("Malformed {what} result: {e}")))
}

impl Client {
    /// `tools/list`. Requires `capabilities.tools.listChanged`.
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.require(ServerCapabilities::supports_tools, "tool listing")?;
        let raw = self.session.request(methods::TOOLS_LIST, None).await?;
        Ok(parse::<ListToolsResult>("tools/list", raw)?.tools)
    }

    /// `tools/execute`. Requires `capabilities.tools.listChanged`.
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, Value>>,
    ) -> McpResult<Value> {
        self.require(ServerCapabilities::supports_tools, "tool execution")?;
        let params = serde_json::to_value(ExecuteToolParams {
            name: name.into(),
            arguments,
        })?;
        self.session
            .request(methods::TOOLS_EXECUTE, Some(params))
            .await
    }

    /// `tools/execute` with a progress sink. The session injects a fresh
    /// token at `params._meta.progressToken` and deregisters the sink when
    /// the call settles.
    pub async fn call_tool_with_progress(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, Value>>,
        on_progress: ProgressSink,
    ) -> McpResult<Value> {
        self.require(ServerCapabilities::supports_tools, "tool execution")?;
        let params = serde_json::to_value(ExecuteToolParams {
            name: name.into(),
            arguments,
        })?;
        self.session
            .request_with_progress(methods::TOOLS_EXECUTE, Some(params), on_progress)
            .await
    }

    /// `prompts/list`. Requires `capabilities.prompts.listChanged`.
    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        self.require(ServerCapabilities::supports_prompts, "prompt listing")?;
        let raw = self.session.request(methods::PROMPTS_LIST, None).await?;
        Ok(parse::<ListPromptsResult>("prompts/list", raw)?.prompts)
    }

    /// `prompts/get`. Requires `capabilities.prompts.listChanged`.
    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, Value>>,
    ) -> McpResult<GetPromptResult> {
        self.require(ServerCapabilities::supports_prompts, "prompt retrieval")?;
        let params = serde_json::to_value(GetPromptParams {
            name: name.into(),
            arguments,
        })?;
        let raw = self
            .session
            .request(methods::PROMPTS_GET, Some(params))
            .await?;
        parse("prompts/get", raw)
    }

    /// `prompts/execute`. Requires `capabilities.prompts.listChanged`.
    pub async fn execute_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, Value>>,
    ) -> McpResult<Value> {
        self.require(ServerCapabilities::supports_prompts, "prompt execution")?;
        let params = serde_json::to_value(GetPromptParams {
            name: name.into(),
            arguments,
        })?;
        self.session
            .request(methods::PROMPTS_EXECUTE, Some(params))
            .await
    }

    /// `resources/list`. Requires `capabilities.resources.listChanged`.
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.require(ServerCapabilities::supports_resources, "resource listing")?;
        let raw = self.session.request(methods::RESOURCES_LIST, None).await?;
        Ok(parse::<ListResourcesResult>("resources/list", raw)?.resources)
    }

    /// `resources/read`. Requires `capabilities.resources.listChanged`.
    pub async fn read_resource(&self, uri: impl Into<String>) -> McpResult<ReadResourceResult> {
        self.require(ServerCapabilities::supports_resources, "resource reading")?;
        let params = serde_json::to_value(ResourceUriParams { uri: uri.into() })?;
        let raw = self
            .session
            .request(methods::RESOURCES_READ, Some(params))
            .await?;
        parse("resources/read", raw)
    }

    /// `resources/subscribe` plus a local per-uri observer. The observer
    /// fires for every `notifications/resources/updated` carrying this uri;
    /// the returned handle detaches it. If the wire subscribe fails the
    /// observer is detached before the error is returned.
    pub async fn subscribe_to_resource(
        &self,
        uri: impl Into<String>,
        observer: impl Fn(&ResourceUpdatedParams) -> McpResult<()> + Send + Sync + 'static,
    ) -> McpResult<Subscription> {
        self.require(
            ServerCapabilities::supports_resources,
            "resource subscriptions",
        )?;
        let uri = uri.into();
        let subscription = self
            .session
            .router()
            .on_resource_updated(uri.clone(), Arc::new(observer));
        let params = serde_json::to_value(ResourceUriParams { uri })?;
        match self
            .session
            .request(methods::RESOURCES_SUBSCRIBE, Some(params))
            .await
        {
            Ok(_) => Ok(subscription),
            Err(e) => {
                subscription.unsubscribe();
                Err(e)
            }
        }
    }

    /// `resources/unsubscribe`; also drops every local observer for the uri.
    pub async fn unsubscribe_from_resource(&self, uri: impl Into<String>) -> McpResult<()> {
        self.require(
            ServerCapabilities::supports_resources,
            "resource subscriptions",
        )?;
        let uri = uri.into();
        let params = serde_json::to_value(ResourceUriParams { uri: uri.clone() })?;
        self.session
            .request(methods::RESOURCES_UNSUBSCRIBE, Some(params))
            .await?;
        self.session.router().remove_resource_observers(&uri);
        Ok(())
    }

    /// `logging/setLevel`. Requires `capabilities.logging`.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> McpResult<()> {
        self.require(ServerCapabilities::supports_logging, "logging")?;
        let params = serde_json::to_value(SetLevelParams { level })?;
        self.session
            .request(methods::LOGGING_SET_LEVEL, Some(params))
            .await?;
        Ok(())
    }

    /// `sampling/createMessage`. Requires `capabilities.sampling.createMessage`.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> McpResult<CreateMessageResult> {
        self.require(ServerCapabilities::supports_sampling, "sampling")?;
        let raw = self
            .session
            .request(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(params)?),
            )
            .await?;
        parse("sampling/createMessage", raw)
    }

    /// `roots/list`. Requires `capabilities.roots.listChanged`.
    pub async fn list_roots(&self) -> McpResult<Vec<Root>> {
        self.require(ServerCapabilities::supports_roots, "roots listing")?;
        let raw = self.session.request(methods::ROOTS_LIST, None).await?;
        Ok(parse::<ListRootsResult>("roots/list", raw)?.roots)
    }

    /// Liveness check. Ungated; both peers answer it.
    pub async fn ping(&self) -> McpResult<()> {
        self.session.request(methods::PING, None).await?;
        Ok(())
    }
}
