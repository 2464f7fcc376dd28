//! Capability negotiation records.
//!
//! Capabilities are sparse maps of feature flags exchanged once during the
//! initialize handshake and frozen for the session's lifetime. A facade call
//! is gated on the *presence* of its flag, not its boolean value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capabilities advertised by the client during initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,

    /// Present if the client can satisfy sampling requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,

    /// Present if the client exposes filesystem roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

/// Capabilities advertised by the server during initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,

    /// Present if the server emits log notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,

    /// Present if the server offers prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    /// Present if the server offers resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    /// Present if the server offers tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,

    /// Present if the server brokers LLM sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,

    /// Present if the server serves a roots list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

impl ServerCapabilities {
    /// Gate for `tools/list` and `tools/execute`.
    pub fn supports_tools(&self) -> bool {
        self.tools
            .as_ref()
            .is_some_and(|t| t.list_changed.is_some())
    }

    /// Gate for `prompts/list`, `prompts/get`, and `prompts/execute`.
    pub fn supports_prompts(&self) -> bool {
        self.prompts
            .as_ref()
            .is_some_and(|p| p.list_changed.is_some())
    }

    /// Gate for `resources/list`, `resources/read`, and subscriptions.
    pub fn supports_resources(&self) -> bool {
        self.resources
            .as_ref()
            .is_some_and(|r| r.list_changed.is_some())
    }

    /// Gate for `logging/setLevel` and log notifications.
    pub fn supports_logging(&self) -> bool {
        self.logging.is_some()
    }

    /// Gate for `sampling/createMessage`.
    pub fn supports_sampling(&self) -> bool {
        self.sampling
            .as_ref()
            .is_some_and(|s| s.create_message.is_some())
    }

    /// Gate for `roots/list` and roots observers.
    pub fn supports_roots(&self) -> bool {
        self.roots
            .as_ref()
            .is_some_and(|r| r.list_changed.is_some())
    }
}

/// Tools feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolsCapability {
    /// Whether the tool list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompts feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PromptsCapability {
    /// Whether the prompt list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourcesCapability {
    /// Whether per-uri subscriptions are supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Whether the resource list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Logging feature flags. Presence alone enables the feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingCapability {}

/// Sampling feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SamplingCapability {
    /// Whether createMessage is supported
    #[serde(rename = "createMessage", skip_serializing_if = "Option::is_none")]
    pub create_message: Option<bool>,
}

/// Roots feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RootsCapability {
    /// Whether the roots list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}
