//! JSON-RPC 2.0 envelope types.
//!
//! A single on-wire frame is exactly one of [`JsonRpcRequest`],
//! [`JsonRpcResponse`] (success or error payload, never both), or
//! [`JsonRpcNotification`]. Batch frames are not part of this protocol.
//!
//! Deserializing these types directly does not enforce every envelope
//! invariant (serde's untagged representation cannot reject a frame carrying
//! both `result` and `error`); inbound bytes must go through
//! [`crate::codec::decode_message`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::JSONRPC_VERSION;

/// JSON-RPC version tag. Serializes as the literal `"2.0"` and refuses
/// anything else on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: integer or string, unique per session direction.
///
/// Booleans, floats, and structured values are rejected at the envelope edge
/// ([`crate::codec`]); `null` ids appear only on [`ResponseId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (the session allocator produces these)
    Number(i64),
    /// String id
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Progress correlation token: integer or string, unique per direction for
/// the lifetime of one request. Carried at `params._meta.progressToken`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// Numeric token
    Number(i64),
    /// String token
    String(String),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ProgressToken {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ProgressToken {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// JSON-RPC request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Version tag, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request frame.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Response identifier. `null` only when correlating to a malformed request
/// whose id could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Response id for a normal, correlated response.
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// Null id, used on parse-error responses.
    pub fn null() -> Self {
        Self(None)
    }

    /// The correlated request id, if any.
    pub fn as_request_id(&self) -> Option<&RequestId> {
        self.0.as_ref()
    }

    /// True when correlating to an unparseable request.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

/// Response payload: success result or error object, mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful result
    Success {
        /// Result value
        result: Value,
    },
    /// Error outcome
    Error {
        /// Error object
        error: JsonRpcError,
    },
}

/// JSON-RPC response frame (success or error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Version tag, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Correlated request id (`null` only on parse errors)
    pub id: ResponseId,
    /// Result or error, never both
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
}

impl JsonRpcResponse {
    /// Successful response for `id`.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: ResponseId::from_request(id),
            payload: JsonRpcResponsePayload::Success { result },
        }
    }

    /// Error response for `id`.
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: ResponseId::from_request(id),
            payload: JsonRpcResponsePayload::Error { error },
        }
    }

    /// Error response with a null id, for frames whose id could not be
    /// recovered.
    pub fn error_null_id(error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: ResponseId::null(),
            payload: JsonRpcResponsePayload::Error { error },
        }
    }

    /// True for success payloads.
    pub fn is_success(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Success { .. })
    }

    /// The result value, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// The error object, if this is an error response.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }
}

/// JSON-RPC notification frame. Carries no id and expects no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Version tag, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification frame.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object carried inside an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (see [`crate::error::ErrorKind`] for the taxonomy)
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Union of the frame variants. Variant order matters for the untagged
/// representation: a frame with `id` + `method` is a request, `method` alone
/// is a notification, and anything else with an `id` is a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request frame
    Request(JsonRpcRequest),
    /// Notification frame
    Notification(JsonRpcNotification),
    /// Response frame (success or error)
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Method name, for request and notification frames.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        Self::Request(r)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        Self::Response(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        Self::Notification(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_round_trips() {
        let json = serde_json::to_string(&JsonRpcVersion).unwrap();
        assert_eq!(json, "\"2.0\"");
        let parsed: JsonRpcVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JsonRpcVersion);
        assert!(serde_json::from_str::<JsonRpcVersion>("\"1.0\"").is_err());
    }

    #[test]
    fn request_serializes_without_empty_params() {
        let request = JsonRpcRequest::new(1, "ping", None);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));
    }

    #[test]
    fn message_variants_disambiguate() {
        let req: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                .unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let notif: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));

        let resp: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn response_accessors() {
        let ok = JsonRpcResponse::success(RequestId::Number(7), json!({"answer": 42}));
        assert!(ok.is_success());
        assert_eq!(ok.result().unwrap()["answer"], 42);
        assert!(ok.error_object().is_none());

        let err = JsonRpcResponse::error(
            RequestId::from("abc"),
            JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            },
        );
        assert!(!err.is_success());
        assert_eq!(err.error_object().unwrap().code, -32601);
    }

    #[test]
    fn null_id_response_round_trips() {
        let resp = JsonRpcResponse::error_null_id(JsonRpcError {
            code: -32700,
            message: "Parse error".into(),
            data: None,
        });
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], Value::Null);
        let parsed: JsonRpcResponse = serde_json::from_value(value).unwrap();
        assert!(parsed.id.is_null());
    }
}
