//! Encode/decode round-trip coverage for every envelope variant, including a
//! property over arbitrary ids, methods, and payloads.

use duplexmcp_protocol::codec::{decode_str, encode_message};
use duplexmcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use proptest::prelude::*;
use serde_json::json;

fn round_trip(message: JsonRpcMessage) -> JsonRpcMessage {
    let encoded = encode_message(&message).expect("encode");
    decode_str(&encoded).expect("decode")
}

#[test]
fn request_round_trips() {
    let message = JsonRpcMessage::Request(JsonRpcRequest::new(
        7,
        "tools/execute",
        Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
    ));
    assert_eq!(round_trip(message.clone()), message);
}

#[test]
fn string_id_request_round_trips() {
    let message = JsonRpcMessage::Request(JsonRpcRequest::new("req-9", "resources/list", None));
    assert_eq!(round_trip(message.clone()), message);
}

#[test]
fn success_response_round_trips() {
    let message = JsonRpcMessage::Response(JsonRpcResponse::success(
        RequestId::Number(7),
        json!({"success": true, "id": 1}),
    ));
    assert_eq!(round_trip(message.clone()), message);
}

#[test]
fn error_response_round_trips() {
    let message = JsonRpcMessage::Response(JsonRpcResponse::error(
        RequestId::from("abc"),
        JsonRpcError {
            code: -32601,
            message: "Method not found: nope".into(),
            data: Some(json!({"method": "nope"})),
        },
    ));
    assert_eq!(round_trip(message.clone()), message);
}

#[test]
fn null_id_error_response_round_trips() {
    let message = JsonRpcMessage::Response(JsonRpcResponse::error_null_id(JsonRpcError {
        code: -32700,
        message: "Parse error".into(),
        data: None,
    }));
    assert_eq!(round_trip(message.clone()), message);
}

#[test]
fn notification_round_trips() {
    let message = JsonRpcMessage::Notification(JsonRpcNotification::new(
        "notifications/progress",
        Some(json!({"progressToken": 3, "progress": 75.0, "total": 100.0})),
    ));
    assert_eq!(round_trip(message.clone()), message);
}

fn arb_request_id() -> impl Strategy<Value = RequestId> {
    prop_oneof![
        any::<i64>().prop_map(RequestId::Number),
        "[a-zA-Z0-9_-]{1,24}".prop_map(RequestId::String),
    ]
}

fn arb_params() -> impl Strategy<Value = Option<serde_json::Value>> {
    prop_oneof![
        Just(None),
        Just(Some(json!({}))),
        "[a-z]{1,12}".prop_map(|s| Some(json!({"key": s}))),
        any::<i64>().prop_map(|n| Some(json!({"count": n, "nested": {"flag": true}}))),
    ]
}

proptest! {
    #[test]
    fn arbitrary_requests_round_trip(
        id in arb_request_id(),
        method in "[a-z]{1,10}(/[a-z]{1,10})?",
        params in arb_params(),
    ) {
        let message = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params));
        prop_assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn arbitrary_notifications_round_trip(
        method in "notifications/[a-z]{1,12}",
        params in arb_params(),
    ) {
        let message = JsonRpcMessage::Notification(JsonRpcNotification::new(method, params));
        prop_assert_eq!(round_trip(message.clone()), message);
    }
}
