//! Logging levels and log message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Syslog-style severity, ordered ascending. The server's current level
/// gates outbound log notifications: a message is emitted only when its
/// level is at or above the threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Detailed debugging information. The default threshold: everything
    /// passes.
    #[default]
    Debug,
    /// Normal operational messages
    Info,
    /// Normal but significant events
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

/// Parameters of `logging/setLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// New threshold
    pub level: LoggingLevel,
}

/// Parameters of the `notifications/message` log notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessageParams {
    /// Message severity
    pub level: LoggingLevel,
    /// Originating logger name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary payload
    pub data: Value,
}
