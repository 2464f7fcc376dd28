//! Envelope-level validation and wire codec.
//!
//! [`decode_message`] is the single entry point for inbound bytes. It enforces
//! every envelope invariant before a typed frame is produced, so downstream
//! dispatch can assume well-formed variants:
//!
//! - the frame is a JSON object (batch arrays are not supported),
//! - `jsonrpc` equals `"2.0"`,
//! - an `id`, when present, is an integer or string (never bool, float,
//!   object, or array),
//! - `result` and `error` are mutually exclusive,
//! - a notification carries no `id`,
//! - a `null` id appears only on error responses,
//! - `params._meta.progressToken`, when present, is an integer or string.
//!
//! The same `_meta` check is applied to outbound requests via
//! [`validate_request_meta`] so a malformed progress token is rejected before
//! it ever reaches the wire.

use serde_json::Value;

use crate::JSONRPC_VERSION;
use crate::error::{McpError, McpResult};
use crate::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Parse and validate one frame from raw bytes.
pub fn decode_message(payload: &[u8]) -> McpResult<JsonRpcMessage> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| McpError::parse_error(format!("Parse error: {e}")))?;
    decode_value(value)
}

/// Parse and validate one frame from a string slice.
pub fn decode_str(payload: &str) -> McpResult<JsonRpcMessage> {
    decode_message(payload.as_bytes())
}

/// Validate an already-parsed JSON value as a frame.
pub fn decode_value(value: Value) -> McpResult<JsonRpcMessage> {
    if value.is_array() {
        return Err(McpError::invalid_request("Batch frames are not supported"));
    }
    let obj = value
        .as_object()
        .ok_or_else(|| McpError::invalid_request("Envelope must be a JSON object"))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(McpError::invalid_request(format!(
                "Invalid JSON-RPC version: {other}"
            )));
        }
        None => {
            return Err(McpError::invalid_request(
                "Missing or non-string jsonrpc version",
            ));
        }
    }

    let id = obj.get("id");
    let has_method = obj.contains_key("method");

    if has_method {
        if obj.get("method").and_then(Value::as_str).is_none() {
            return Err(McpError::invalid_request("Method must be a string"));
        }
        if let Some(params) = obj.get("params") {
            validate_request_meta(params)?;
        }
        match id {
            Some(id_value) => {
                if !is_valid_id(id_value) {
                    return Err(McpError::invalid_request(
                        "Request id must be an integer or string",
                    ));
                }
                let request: JsonRpcRequest = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::invalid_request(format!("Malformed request: {e}")))?;
                Ok(JsonRpcMessage::Request(request))
            }
            None => {
                let notification: JsonRpcNotification = serde_json::from_value(value.clone())
                    .map_err(|e| {
                        McpError::invalid_request(format!("Malformed notification: {e}"))
                    })?;
                Ok(JsonRpcMessage::Notification(notification))
            }
        }
    } else {
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        match (has_result, has_error) {
            (true, true) => {
                return Err(McpError::invalid_request(
                    "Frame carries both result and error",
                ));
            }
            (false, false) => {
                return Err(McpError::invalid_request(
                    "Frame is neither request, response, nor notification",
                ));
            }
            _ => {}
        }
        match id {
            None => {
                return Err(McpError::invalid_request("Response must carry an id"));
            }
            Some(Value::Null) => {
                // Tolerated only when correlating to an unparseable request.
                if has_result {
                    return Err(McpError::invalid_request(
                        "Null response id is only valid on error responses",
                    ));
                }
            }
            Some(id_value) => {
                if !is_valid_id(id_value) {
                    return Err(McpError::invalid_request(
                        "Response id must be an integer or string",
                    ));
                }
            }
        }
        let response: JsonRpcResponse = serde_json::from_value(value.clone())
            .map_err(|e| McpError::invalid_request(format!("Malformed response: {e}")))?;
        Ok(JsonRpcMessage::Response(response))
    }
}

/// Serialize one frame for the wire.
pub fn encode_message(message: &JsonRpcMessage) -> McpResult<String> {
    serde_json::to_string(message)
        .map_err(|e| McpError::internal(format!("Failed to encode frame: {e}")))
}

/// Validate the reserved `_meta` slot of a params object.
///
/// `_meta` is a sibling of the method arguments, never one of them; the only
/// field the session interprets is `progressToken`, which must be an integer
/// or string.
pub fn validate_request_meta(params: &Value) -> McpResult<()> {
    let Some(meta) = params.get("_meta") else {
        return Ok(());
    };
    let meta = meta
        .as_object()
        .ok_or_else(|| McpError::invalid_request("params._meta must be an object"))?;
    if let Some(token) = meta.get("progressToken")
        && !is_valid_id(token)
    {
        return Err(McpError::invalid_request(
            "Progress token must be an integer or string",
        ));
    }
    Ok(())
}

/// Integer-or-string check shared by ids and progress tokens. Floats,
/// booleans, and structured values are rejected.
fn is_valid_id(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Number(n) => n.as_i64().is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_frames() {
        assert!(matches!(
            decode_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap(),
            JsonRpcMessage::Request(_)
        ));
        assert!(matches!(
            decode_value(json!({"jsonrpc": "2.0", "method": "notifications/progress",
                "params": {"progressToken": 3, "progress": 1.0}}))
            .unwrap(),
            JsonRpcMessage::Notification(_)
        ));
        assert!(matches!(
            decode_value(json!({"jsonrpc": "2.0", "id": "a", "result": {"ok": true}})).unwrap(),
            JsonRpcMessage::Response(_)
        ));
        assert!(matches!(
            decode_value(json!({"jsonrpc": "2.0", "id": null,
                "error": {"code": -32700, "message": "Parse error"}}))
            .unwrap(),
            JsonRpcMessage::Response(_)
        ));
    }

    #[test]
    fn rejects_bad_version() {
        assert!(decode_value(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).is_err());
        assert!(decode_value(json!({"id": 1, "method": "ping"})).is_err());
    }

    #[test]
    fn rejects_result_error_cooccurrence() {
        let err = decode_value(json!({"jsonrpc": "2.0", "id": 1, "result": {},
            "error": {"code": -32603, "message": "boom"}}))
        .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidRequest);
    }

    #[test]
    fn rejects_bad_id_kinds() {
        for id in [json!(true), json!(1.5), json!({"n": 1}), json!([1])] {
            let err =
                decode_value(json!({"jsonrpc": "2.0", "id": id, "method": "ping"})).unwrap_err();
            assert_eq!(err.kind, crate::ErrorKind::InvalidRequest);
        }
    }

    #[test]
    fn rejects_null_id_success() {
        assert!(decode_value(json!({"jsonrpc": "2.0", "id": null, "result": {}})).is_err());
    }

    #[test]
    fn rejects_boolean_progress_token() {
        let err = decode_value(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/execute",
            "params": {"name": "t", "_meta": {"progressToken": true}}}))
        .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidRequest);

        assert!(validate_request_meta(&json!({"_meta": {"progressToken": false}})).is_err());
        assert!(validate_request_meta(&json!({"_meta": {"progressToken": "tok"}})).is_ok());
        assert!(validate_request_meta(&json!({"x": 1})).is_ok());
    }

    #[test]
    fn rejects_batch_and_scalars() {
        assert!(decode_value(json!([{"jsonrpc": "2.0", "id": 1, "method": "ping"}])).is_err());
        assert!(decode_value(json!("hello")).is_err());
    }

    #[test]
    fn parse_error_on_garbage_bytes() {
        let err = decode_message(b"{not json").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::ParseError);
    }
}
