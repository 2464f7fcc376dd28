//! Method and notification names.
//!
//! One constant per wire method keeps the client facade, the server
//! dispatcher, and the notification router in agreement. Handlers registered
//! for custom methods use arbitrary names; these are the built-ins.

/// Initialize handshake request.
pub const INITIALIZE: &str = "initialize";
/// Liveness check, answered by both peers.
pub const PING: &str = "ping";

/// List registered tools.
pub const TOOLS_LIST: &str = "tools/list";
/// Execute a tool by name.
pub const TOOLS_EXECUTE: &str = "tools/execute";

/// List registered prompts.
pub const PROMPTS_LIST: &str = "prompts/list";
/// Fetch a prompt rendered with arguments.
pub const PROMPTS_GET: &str = "prompts/get";
/// Execute a prompt's handler with arguments.
pub const PROMPTS_EXECUTE: &str = "prompts/execute";

/// List registered resources.
pub const RESOURCES_LIST: &str = "resources/list";
/// Read a resource's contents by uri.
pub const RESOURCES_READ: &str = "resources/read";
/// Subscribe to per-uri update notifications.
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Drop a per-uri subscription.
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

/// Set the server's logging threshold.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// Request an LLM completion from the peer.
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

/// List filesystem roots.
pub const ROOTS_LIST: &str = "roots/list";

/// Handshake completion, sent by the client exactly once after Ready.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// Out-of-band progress for an in-flight request.
pub const NOTIF_PROGRESS: &str = "notifications/progress";
/// Cancellation of an in-flight request.
pub const NOTIF_CANCELLED: &str = "notifications/cancelled";
/// Server log message, gated by the logging threshold.
pub const NOTIF_MESSAGE: &str = "notifications/message";
/// A subscribed resource changed.
pub const NOTIF_RESOURCE_UPDATED: &str = "notifications/resources/updated";
/// Legacy alias for [`NOTIF_RESOURCE_UPDATED`] still seen on the wire.
pub const NOTIF_RESOURCE_CHANGED: &str = "notifications/resourceChanged";
/// The resource list changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// The tool list changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// The prompt list changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// A sampling message was created.
pub const NOTIF_MESSAGE_CREATED: &str = "notifications/messageCreated";
/// The roots list changed.
pub const NOTIF_ROOTS_CHANGED: &str = "notifications/rootsChanged";

/// Session-close signal. Not a JSON-RPC standard method; receipt closes the
/// session, absence is non-fatal.
pub const NOTIF_DISCONNECT: &str = "disconnect";
