//! Error taxonomy.
//!
//! Every failure the runtime surfaces is an [`McpError`]: a closed
//! [`ErrorKind`] with its JSON-RPC code, a message, and optional structured
//! data. The same type flows in both directions: outbound it becomes the
//! `error` object of an error response via [`McpError::to_json_rpc`]; inbound
//! error responses convert back through `From<JsonRpcError>`.

use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// Result alias for protocol operations.
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Closed error classification with fixed JSON-RPC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Envelope JSON does not parse (-32700)
    ParseError,
    /// Envelope fails schema or version check (-32600)
    InvalidRequest,
    /// No handler registered for the method (-32601)
    MethodNotFound,
    /// Handler-level validation failure: missing required prompt argument,
    /// unknown resource uri, bad tool input (-32602)
    InvalidParams,
    /// Uncaught handler failure (-32603)
    Internal,
    /// Explicit schema validation failure at an API boundary (-32402)
    Validation,
    /// Missing or invalid authorization, OAuth flow failure (-32401)
    Auth,
    /// A peer acted before the initialize handshake completed (-32002)
    ServerNotInitialized,
    /// Request timeout, cancellation, transport closure, version mismatch,
    /// unsupported capability (-32001)
    RequestFailed,
}

impl ErrorKind {
    /// JSON-RPC error code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::Validation => -32402,
            Self::Auth => -32401,
            Self::ServerNotInitialized => -32002,
            Self::RequestFailed => -32001,
        }
    }

    /// Map a wire code back to a kind. Codes outside the taxonomy collapse
    /// to [`ErrorKind::Internal`]; the original code survives in the
    /// converted error's `data`.
    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::Internal,
            -32402 => Self::Validation,
            -32401 => Self::Auth,
            -32002 => Self::ServerNotInitialized,
            -32001 => Self::RequestFailed,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ParseError => "parse error",
            Self::InvalidRequest => "invalid request",
            Self::MethodNotFound => "method not found",
            Self::InvalidParams => "invalid params",
            Self::Internal => "internal error",
            Self::Validation => "validation error",
            Self::Auth => "authorization error",
            Self::ServerNotInitialized => "server not initialized",
            Self::RequestFailed => "request failed",
        };
        f.write_str(name)
    }
}

/// Protocol error: kind, message, optional structured data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct McpError {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional details suitable for the wire
    pub data: Option<Value>,
}

impl McpError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Envelope JSON does not parse.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Envelope fails schema or version check.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// No handler registered for the method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Handler-level validation failure.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Uncaught handler failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Explicit schema validation failure at an API boundary.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Authorization failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// A peer acted before the initialize handshake completed.
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerNotInitialized, message)
    }

    /// Timeout, cancellation, transport closure, version mismatch, or
    /// unsupported capability.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestFailed, message)
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// `{code, message, data?}` object suitable for direct inclusion in an
    /// error-response envelope.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        let kind = ErrorKind::from_code(err.code);
        let data = if kind.code() == err.code {
            err.data
        } else {
            // Preserve an out-of-taxonomy code alongside any original data.
            Some(serde_json::json!({
                "originalCode": err.code,
                "data": err.data,
            }))
        };
        Self {
            kind,
            message: err.message,
            data,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("Serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(McpError::parse_error("x").code(), -32700);
        assert_eq!(McpError::invalid_request("x").code(), -32600);
        assert_eq!(McpError::method_not_found("m").code(), -32601);
        assert_eq!(McpError::invalid_params("x").code(), -32602);
        assert_eq!(McpError::internal("x").code(), -32603);
        assert_eq!(McpError::validation("x").code(), -32402);
        assert_eq!(McpError::auth("x").code(), -32401);
        assert_eq!(McpError::not_initialized("x").code(), -32002);
        assert_eq!(McpError::request_failed("x").code(), -32001);
    }

    #[test]
    fn to_json_rpc_carries_code_message_data() {
        let err = McpError::invalid_params("Missing required argument: name")
            .with_data(serde_json::json!({"argument": "name"}));
        let wire = err.to_json_rpc();
        assert_eq!(wire.code, -32602);
        assert_eq!(wire.message, "Missing required argument: name");
        assert_eq!(wire.data.unwrap()["argument"], "name");
    }

    #[test]
    fn wire_round_trip_preserves_kind() {
        let err = McpError::request_failed("Request cancelled: gone");
        let back = McpError::from(err.to_json_rpc());
        assert_eq!(back.kind, ErrorKind::RequestFailed);
        assert_eq!(back.message, "Request cancelled: gone");
    }

    #[test]
    fn unknown_code_collapses_to_internal_but_keeps_code() {
        let back = McpError::from(JsonRpcError {
            code: -32099,
            message: "weird".into(),
            data: None,
        });
        assert_eq!(back.kind, ErrorKind::Internal);
        assert_eq!(back.data.unwrap()["originalCode"], -32099);
    }
}
