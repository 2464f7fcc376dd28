//! End-to-end scenarios: a real client and a real server wired back to back
//! over the in-memory pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use duplexmcp_client::{Client, ClientOptions};
use duplexmcp_protocol::jsonrpc::JsonRpcMessage;
use duplexmcp_protocol::types::{
    Content, CreateMessageParams, CreateMessageResult, Implementation, LoggingLevel, Prompt,
    PromptArgument, Resource, Role, SamplingMessage, ServerCapabilities, Tool,
};
use duplexmcp_protocol::{ErrorKind, McpResult};
use duplexmcp_server::{SamplingHandler, Server, ServerOptions};
use duplexmcp_session::SessionState;
use duplexmcp_transport::{InMemoryTransport, Transport};

fn server_options() -> ServerOptions {
    ServerOptions {
        info: Implementation::new("s", "1"),
        ..Default::default()
    }
}

fn client_options() -> ClientOptions {
    ClientOptions {
        info: Implementation::new("c", "1"),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Build a pair, hand the server side to `setup`, connect both ends.
/// Returns the client, the server, and a clone of the client-side transport
/// for observing the server→client wire.
async fn wired<F, Fut>(options: ServerOptions, setup: F) -> (Client, Server, InMemoryTransport)
where
    F: FnOnce(Arc<Server>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let (client_side, server_side) = InMemoryTransport::pair();
    let server = Arc::new(Server::new(Arc::new(server_side), options));
    setup(Arc::clone(&server)).await;
    server.connect().await.unwrap();

    let client = Client::with_options(Arc::new(client_side.clone()), client_options());
    client.connect().await.unwrap();
    let server = Arc::try_unwrap(server).unwrap_or_else(|arc| {
        panic!("setup must not keep the server alive: {arc:?}")
    });
    (client, server, client_side)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn initialize_happy_path() {
    let (client, server, _wire) = wired(
        ServerOptions {
            capabilities: Some(ServerCapabilities::default()),
            ..server_options()
        },
        |_| async {},
    )
    .await;

    assert_eq!(client.state(), SessionState::Ready);
    let caps = client.server_capabilities().unwrap();
    assert_eq!(serde_json::to_value(&caps).unwrap(), json!({}));
    assert_eq!(client.server_info().unwrap().name, "s");

    settle().await;
    assert_eq!(server.state(), SessionState::Ready);
    assert_eq!(server.client_info().unwrap().name, "c");
}

#[tokio::test]
async fn concurrent_tool_calls_settle_independently() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .register_tool(
                Tool {
                    name: "echo".into(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                },
                |args: HashMap<String, Value>, _ctx| async move { Ok(json!({"echo": args})) },
            )
            .await
            .unwrap();
    })
    .await;

    let args_a = HashMap::from([("tag".to_string(), json!("a"))]);
    let args_b = HashMap::from([("tag".to_string(), json!("b"))]);
    let (a, b) = tokio::join!(
        client.call_tool("echo", Some(args_a)),
        client.call_tool("echo", Some(args_b)),
    );
    assert_eq!(a.unwrap()["echo"]["tag"], "a");
    assert_eq!(b.unwrap()["echo"]["tag"], "b");
}

#[tokio::test]
async fn progress_reports_stream_back_to_the_caller() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .register_tool(
                Tool {
                    name: "t".into(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                },
                |_args, ctx| async move {
                    let reporter = ctx.progress().expect("caller attached a token");
                    reporter.report(75.0, Some(100.0)).await?;
                    Ok(json!({"success": true}))
                },
            )
            .await
            .unwrap();
    })
    .await;

    let updates = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = {
        let updates = Arc::clone(&updates);
        Arc::new(move |progress: f64, total: Option<f64>| {
            updates.lock().unwrap().push((progress, total));
        })
    };

    let result = client
        .call_tool_with_progress("t", None, sink)
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(*updates.lock().unwrap(), vec![(75.0, Some(100.0))]);
}

#[tokio::test]
async fn resource_overwrite_notifies_in_order() {
    let resource = Resource {
        uri: "test://r1".into(),
        name: "R".into(),
        description: None,
        mime_type: "text/plain".into(),
        size: None,
    };
    let (client, server, wire) = wired(server_options(), |server| {
        let resource = resource.clone();
        async move {
            server.add_or_replace_resource(resource).await.unwrap();
        }
    })
    .await;

    // Observe the server→client wire from here on.
    let frames = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let frames = Arc::clone(&frames);
        wire.subscribe_messages(Arc::new(move |m: &JsonRpcMessage| {
            if let Some(method) = m.method() {
                frames.lock().unwrap().push(method.to_string());
            }
        }));
    }

    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = Arc::clone(&hits);
        client
            .subscribe_to_resource("test://r1", move |params| {
                assert_eq!(params.uri, "test://r1");
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
    }

    server
        .add_or_replace_resource(Resource {
            description: Some("new".into()),
            ..resource
        })
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        *frames.lock().unwrap(),
        vec![
            "notifications/resources/list_changed".to_string(),
            "notifications/resources/updated".to_string(),
        ]
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.subscribed_uris(), vec!["test://r1".to_string()]);
}

#[tokio::test]
async fn tool_input_validation_rejects_with_invalid_params() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .register_tool(
                Tool {
                    name: "strict".into(),
                    description: None,
                    input_schema: json!({
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"],
                    }),
                },
                |_args, _ctx| async move { Ok(json!({"ok": true})) },
            )
            .await
            .unwrap();
    })
    .await;

    let err = client.call_tool("strict", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert!(err.message.starts_with("Invalid params"));

    let good = HashMap::from([("text".to_string(), json!("hello"))]);
    assert_eq!(
        client.call_tool("strict", Some(good)).await.unwrap()["ok"],
        true
    );
}

#[tokio::test]
async fn missing_required_prompt_argument_is_invalid_params() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .register_prompt(
                Prompt {
                    name: "greet".into(),
                    description: None,
                    arguments: Some(vec![PromptArgument {
                        name: "name".into(),
                        description: None,
                        required: Some(true),
                    }]),
                },
                |args: HashMap<String, Value>| async move {
                    Ok(duplexmcp_protocol::types::GetPromptResult {
                        description: None,
                        messages: vec![duplexmcp_protocol::types::PromptMessage {
                            role: Role::User,
                            content: Content::text(format!("Hello {}", args["name"])),
                        }],
                    })
                },
            )
            .await
            .unwrap();
    })
    .await;

    let err = client.get_prompt("greet", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert_eq!(err.message, "Missing required argument: name");

    let args = HashMap::from([("name".to_string(), json!("Ada"))]);
    let rendered = client.get_prompt("greet", Some(args)).await.unwrap();
    assert_eq!(rendered.messages.len(), 1);
}

#[tokio::test]
async fn unknown_resource_read_is_invalid_params() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .add_or_replace_resource_with_text(
                Resource {
                    uri: "test://r1".into(),
                    name: "R".into(),
                    description: None,
                    mime_type: "text/plain".into(),
                    size: None,
                },
                "body",
            )
            .await
            .unwrap();
    })
    .await;

    let err = client.read_resource("test://nope").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert_eq!(err.message, "Resource not found: test://nope");

    let read = client.read_resource("test://r1").await.unwrap();
    assert_eq!(read.contents[0].text.as_deref(), Some("body"));
}

#[tokio::test]
async fn unknown_logging_level_is_invalid_params() {
    let (client, _server, _wire) = wired(server_options(), |_| async {}).await;

    let err = client
        .session()
        .request("logging/setLevel", Some(json!({"level": "verbose"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
}

#[tokio::test]
async fn log_messages_respect_the_threshold() {
    let (client, server, _wire) = wired(server_options(), |_| async {}).await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        client.on_log_message(move |params| {
            seen.lock().unwrap().push(params.level);
            Ok(())
        });
    }

    client.set_logging_level(LoggingLevel::Warning).await.unwrap();
    assert_eq!(server.logging_level(), LoggingLevel::Warning);

    server
        .log(LoggingLevel::Info, json!("suppressed"), None)
        .await
        .unwrap();
    server
        .log(LoggingLevel::Error, json!("delivered"), Some("core".into()))
        .await
        .unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![LoggingLevel::Error]);
}

struct CannedSampler;

#[async_trait]
impl SamplingHandler for CannedSampler {
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        assert!(!params.messages.is_empty());
        Ok(CreateMessageResult {
            role: Role::Assistant,
            content: Content::text("canned"),
            model: Some("test-model".into()),
            stop_reason: Some("endTurn".into()),
        })
    }
}

#[tokio::test]
async fn sampling_round_trip_fires_message_created() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server.set_sampling_handler(CannedSampler);
    })
    .await;

    let created = Arc::new(std::sync::Mutex::new(Vec::<SamplingMessage>::new()));
    {
        let created = Arc::clone(&created);
        client.on_message_created(move |message| {
            created.lock().unwrap().push(message.clone());
            Ok(())
        });
    }

    let result = client
        .create_message(CreateMessageParams {
            messages: vec![SamplingMessage {
                role: Role::User,
                content: Content::text("hi"),
            }],
            system_prompt: None,
            max_tokens: Some(64),
            temperature: None,
            stop_sequences: None,
        })
        .await
        .unwrap();
    assert_eq!(result.model.as_deref(), Some("test-model"));

    settle().await;
    let created = created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].content, Content::text("canned"));
}

#[tokio::test]
async fn custom_method_errors_map_to_internal() {
    let (client, server, _wire) = wired(server_options(), |_| async {}).await;

    server
        .register_method("custom/fail", |_params| async move {
            Err::<Value, _>(duplexmcp_protocol::McpError::request_failed("boom"))
        })
        .unwrap();

    // Duplicate registration is rejected.
    let dup = server.register_method("custom/fail", |_params| async move { Ok(json!({})) });
    assert_eq!(dup.unwrap_err().kind, ErrorKind::Validation);

    let err = client
        .session()
        .request("custom/fail", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(err.message, "boom");

    let err = client
        .session()
        .request("custom/missing", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MethodNotFound);
}

#[tokio::test]
async fn server_close_signals_the_client() {
    let (client, server, _wire) = wired(server_options(), |_| async {}).await;

    server.close().await.unwrap();
    settle().await;

    assert_eq!(server.state(), SessionState::Closed);
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn derived_capabilities_reflect_registered_features() {
    let (client, _server, _wire) = wired(server_options(), |server| async move {
        server
            .register_tool(
                Tool {
                    name: "echo".into(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                },
                |args: HashMap<String, Value>, _ctx| async move { Ok(json!({"echo": args})) },
            )
            .await
            .unwrap();
    })
    .await;

    let caps = client.server_capabilities().unwrap();
    assert!(caps.supports_tools());
    assert!(caps.supports_logging());
    assert!(!caps.supports_prompts());
    assert!(!caps.supports_sampling());

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "echo");
}
