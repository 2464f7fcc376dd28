//! Payload types for the built-in notifications.

use serde::{Deserialize, Serialize};

use super::roots::Root;
use super::sampling::SamplingMessage;
use crate::jsonrpc::{ProgressToken, RequestId};

/// Parameters of `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Token correlating this update to an in-flight request
    #[serde(rename = "progressToken")]
    pub progress_token: ProgressToken,
    /// Work done so far
    pub progress: f64,
    /// Total work, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// Parameters of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// Id of the request being cancelled
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// Optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters of `notifications/resources/updated` (and its
/// `notifications/resourceChanged` alias).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdatedParams {
    /// Uri of the updated resource
    pub uri: String,
}

/// Parameters of `notifications/messageCreated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreatedParams {
    /// The created message
    pub message: SamplingMessage,
}

/// Parameters of `notifications/rootsChanged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootsChangedParams {
    /// New roots list
    pub roots: Vec<Root>,
}
