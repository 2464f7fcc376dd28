//! Session engine scenarios driven over the in-memory pair, with a scripted
//! peer on the far side so the tests can produce traffic a well-behaved
//! implementation never would (wrong versions, out-of-order replies,
//! cancellations).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use duplexmcp_protocol::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use duplexmcp_protocol::types::{
    Implementation, InitializeRequestParams, InitializeResult, ServerCapabilities,
};
use duplexmcp_protocol::{ErrorKind, LATEST_PROTOCOL_VERSION, McpResult};
use duplexmcp_session::{
    ProgressSink, RequestDispatcher, Session, SessionConfig, SessionState,
};
use duplexmcp_transport::{InMemoryTransport, Transport};

/// Scripted far end of the pair: records every frame and exposes them as a
/// stream the test can await.
struct Peer {
    transport: Arc<InMemoryTransport>,
    frames: Arc<Mutex<Vec<JsonRpcMessage>>>,
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl Peer {
    async fn attach(transport: InMemoryTransport) -> Self {
        let transport = Arc::new(transport);
        transport.connect().await.unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let frames = Arc::clone(&frames);
            transport.subscribe_messages(Arc::new(move |m: &JsonRpcMessage| {
                frames.lock().push(m.clone());
                let _ = tx.send(m.clone());
            }));
        }
        Self {
            transport,
            frames,
            rx,
        }
    }

    async fn expect_request(&mut self, method: &str) -> JsonRpcRequest {
        loop {
            let message = self.rx.recv().await.expect("peer stream ended");
            if let JsonRpcMessage::Request(request) = message
                && request.method == method
            {
                return request;
            }
        }
    }

    async fn expect_response(&mut self) -> JsonRpcResponse {
        loop {
            let message = self.rx.recv().await.expect("peer stream ended");
            if let JsonRpcMessage::Response(response) = message {
                return response;
            }
        }
    }

    async fn send(&self, message: impl Into<JsonRpcMessage>) {
        self.transport.send(message.into()).await.unwrap();
    }

    fn recorded_methods(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }
}

fn init_result(version: &str) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": {"tools": {"listChanged": true}},
        "serverInfo": {"name": "s", "version": "1"},
    })
}

fn client_session(transport: InMemoryTransport, timeout: Duration) -> Session {
    Session::new(
        Arc::new(transport),
        SessionConfig::client(Implementation::new("c", "1")).with_request_timeout(timeout),
    )
}

/// Connect + handshake against a peer that answers initialize correctly.
async fn ready_pair(timeout: Duration) -> (Session, Peer) {
    let (near, far) = InMemoryTransport::pair();
    let mut peer = Peer::attach(far).await;
    let session = client_session(near, timeout);
    session.connect_transport().await.unwrap();

    let (init, ()) = tokio::join!(session.initialize_client(), async {
        let request = peer.expect_request("initialize").await;
        peer.send(JsonRpcResponse::success(
            request.id,
            init_result(LATEST_PROTOCOL_VERSION),
        ))
        .await;
    });
    init.unwrap();
    (session, peer)
}

#[tokio::test]
async fn initialize_reaches_ready_and_caches_capabilities() {
    let (session, peer) = ready_pair(Duration::from_secs(5)).await;

    assert_eq!(session.state(), SessionState::Ready);
    let caps = session.server_capabilities().unwrap();
    assert!(caps.supports_tools());
    assert_eq!(session.peer_info().unwrap().name, "s");

    // The initialized notification followed the handshake, exactly once.
    let methods = peer.recorded_methods();
    assert_eq!(
        methods
            .iter()
            .filter(|m| *m == "notifications/initialized")
            .count(),
        1
    );
    assert_eq!(methods[0], "initialize");
}

#[tokio::test]
async fn version_mismatch_fails_and_closes() {
    let (near, far) = InMemoryTransport::pair();
    let mut peer = Peer::attach(far).await;
    let session = client_session(near, Duration::from_secs(5));
    session.connect_transport().await.unwrap();

    let (init, ()) = tokio::join!(session.initialize_client(), async {
        let request = peer.expect_request("initialize").await;
        peer.send(JsonRpcResponse::success(request.id, init_result("0.1.0")))
            .await;
    });

    let err = init.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestFailed);
    assert!(err.message.contains("Protocol version mismatch"));
    assert_eq!(session.state(), SessionState::Closed);

    // No initialized notification after a failed handshake.
    assert!(
        !peer
            .recorded_methods()
            .contains(&"notifications/initialized".to_string())
    );
}

#[tokio::test]
async fn connecting_twice_violates_the_state_machine() {
    let (session, _peer) = ready_pair(Duration::from_secs(5)).await;

    let err = session.connect_transport().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestFailed);
    assert!(err.message.contains("Invalid session state transition"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn requests_before_ready_fail_synchronously() {
    let (near, _far) = InMemoryTransport::pair();
    let session = client_session(near, Duration::from_secs(5));

    let err = session.request("tools/list", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerNotInitialized);
}

#[tokio::test]
async fn concurrent_requests_settle_independently_out_of_order() {
    let (session, mut peer) = ready_pair(Duration::from_secs(5)).await;

    let (a, b, ()) = tokio::join!(
        session.request("tools/execute", Some(json!({"name": "a"}))),
        session.request("tools/execute", Some(json!({"name": "b"}))),
        async {
            let first = peer.expect_request("tools/execute").await;
            let second = peer.expect_request("tools/execute").await;
            assert_ne!(first.id, second.id);

            // Answer in reverse arrival order; each reply echoes the name so
            // the callers can check they got their own result.
            for request in [second, first] {
                let name = request.params.as_ref().unwrap()["name"].clone();
                peer.send(JsonRpcResponse::success(
                    request.id,
                    json!({"success": true, "name": name}),
                ))
                .await;
            }
        }
    );

    assert_eq!(a.unwrap()["name"], "a");
    assert_eq!(b.unwrap()["name"], "b");
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn outbound_ids_are_unique_and_monotonic() {
    let (session, mut peer) = ready_pair(Duration::from_secs(5)).await;

    for _ in 0..3 {
        let (result, ()) = tokio::join!(session.request("ping", None), async {
            let request = peer.expect_request("ping").await;
            peer.send(JsonRpcResponse::success(request.id, json!({}))).await;
        });
        result.unwrap();
    }

    let ids: Vec<i64> = peer
        .frames
        .lock()
        .iter()
        .filter_map(|m| match m {
            JsonRpcMessage::Request(r) => serde_json::to_value(&r.id).unwrap().as_i64(),
            _ => None,
        })
        .collect();
    // initialize took id 1; every later id is fresh and increasing.
    assert_eq!(ids.len(), 4);
    for window in ids.windows(2) {
        assert!(window[0] < window[1]);
    }
}

#[tokio::test]
async fn cancellation_rejects_the_awaiter_and_clears_the_entry() {
    let (session, mut peer) = ready_pair(Duration::from_secs(5)).await;

    let (result, ()) = tokio::join!(
        session.request("tools/execute", Some(json!({"name": "slow"}))),
        async {
            let request = peer.expect_request("tools/execute").await;
            peer.send(JsonRpcNotification::new(
                "notifications/cancelled",
                Some(json!({"requestId": request.id, "reason": "Test cancellation"})),
            ))
            .await;
        }
    );

    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestFailed);
    assert_eq!(err.message, "Request cancelled: Test cancellation");
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn cancellation_without_reason_uses_the_default() {
    let (session, mut peer) = ready_pair(Duration::from_secs(5)).await;

    let (result, ()) = tokio::join!(session.request("tools/execute", None), async {
        let request = peer.expect_request("tools/execute").await;
        peer.send(JsonRpcNotification::new(
            "notifications/cancelled",
            Some(json!({"requestId": request.id})),
        ))
        .await;
    });

    assert_eq!(
        result.unwrap_err().message,
        "Request cancelled: No reason provided"
    );
}

#[tokio::test]
async fn progress_streams_to_the_sink_until_settlement() {
    let (session, mut peer) = ready_pair(Duration::from_secs(5)).await;

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink: ProgressSink = {
        let updates = Arc::clone(&updates);
        Arc::new(move |progress, total| updates.lock().push((progress, total)))
    };

    let (result, token) = tokio::join!(
        session.request_with_progress("tools/execute", Some(json!({"name": "t"})), sink),
        async {
            let request = peer.expect_request("tools/execute").await;
            let token = request.params.as_ref().unwrap()["_meta"]["progressToken"].clone();
            assert!(token.is_i64(), "token must be injected under _meta");

            peer.send(JsonRpcNotification::new(
                "notifications/progress",
                Some(json!({"progressToken": token, "progress": 75.0, "total": 100.0})),
            ))
            .await;
            peer.send(JsonRpcResponse::success(request.id, json!({"success": true})))
                .await;
            token
        }
    );

    assert_eq!(result.unwrap()["success"], true);
    assert_eq!(*updates.lock(), vec![(75.0, Some(100.0))]);

    // Late progress for the settled request is a no-op: the sink was
    // deregistered at settlement.
    peer.send(JsonRpcNotification::new(
        "notifications/progress",
        Some(json!({"progressToken": token, "progress": 99.0, "total": 100.0})),
    ))
    .await;
    tokio::task::yield_now().await;
    assert_eq!(updates.lock().len(), 1);
}

#[tokio::test]
async fn boolean_progress_token_is_rejected_before_the_wire() {
    let (session, peer) = ready_pair(Duration::from_secs(5)).await;
    let frames_before = peer.frames.lock().len();

    let err = session
        .request(
            "tools/execute",
            Some(json!({"name": "t", "_meta": {"progressToken": true}})),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(peer.frames.lock().len(), frames_before);
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects_and_late_responses_are_discarded() {
    let (session, mut peer) = ready_pair(Duration::from_millis(50)).await;

    let absorbed = Arc::new(Mutex::new(Vec::new()));
    {
        let absorbed = Arc::clone(&absorbed);
        session.on_error(move |e| absorbed.lock().push(e.message.clone()));
    }

    let result = session
        .request("tools/execute", Some(json!({"name": "never"})))
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestFailed);
    assert_eq!(err.message, "Request timed out after 50ms");
    assert_eq!(session.pending_requests(), 0);

    // The counterparty answers anyway; the orphan response is dropped
    // without disturbing the session.
    let request = peer.expect_request("tools/execute").await;
    peer.send(JsonRpcResponse::success(request.id, json!({"late": true})))
        .await;
    tokio::task::yield_now().await;
    assert!(absorbed.lock().is_empty());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn close_drains_pending_with_a_transport_closed_error() {
    let (session, mut peer) = ready_pair(Duration::from_secs(30)).await;

    let (result, ()) = tokio::join!(session.request("tools/execute", None), async {
        peer.expect_request("tools/execute").await;
        session.close().await.unwrap();
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestFailed);
    assert!(err.message.contains("Transport closed"));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn peer_transport_loss_closes_the_session() {
    let (session, peer) = ready_pair(Duration::from_secs(5)).await;

    peer.transport.disconnect().await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(session.state(), SessionState::Closed);
    let err = session.request("tools/list", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerNotInitialized);
}

// ---------------------------------------------------------------------------
// server-role gating
// ---------------------------------------------------------------------------

struct EchoDispatcher;

#[async_trait]
impl RequestDispatcher for EchoDispatcher {
    async fn initialize(&self, params: InitializeRequestParams) -> McpResult<InitializeResult> {
        assert_eq!(params.protocol_version, LATEST_PROTOCOL_VERSION);
        Ok(InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::new("s", "1"),
            instructions: None,
        })
    }

    async fn dispatch(&self, method: &str, _params: Option<Value>) -> McpResult<Value> {
        Ok(json!({"echo": method}))
    }
}

async fn server_session_with_scripted_client() -> (Session, Peer) {
    let (near, far) = InMemoryTransport::pair();
    let peer = Peer::attach(far).await;
    let session = Session::new(
        Arc::new(near),
        SessionConfig::server(Implementation::new("s", "1")),
    );
    session.set_dispatcher(Arc::new(EchoDispatcher));
    session.connect_transport().await.unwrap();
    (session, peer)
}

#[tokio::test]
async fn server_rejects_methods_before_initialized_notification() {
    let (session, mut peer) = server_session_with_scripted_client().await;

    // A request ahead of the handshake never reaches the dispatcher.
    peer.send(JsonRpcRequest::new(1, "tools/list", None)).await;
    let response = peer.expect_response().await;
    assert_eq!(response.error_object().unwrap().code, -32002);

    // The handshake itself is always allowed.
    peer.send(JsonRpcRequest::new(
        2,
        "initialize",
        Some(json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "1"},
        })),
    ))
    .await;
    let response = peer.expect_response().await;
    assert_eq!(
        response.result().unwrap()["protocolVersion"],
        LATEST_PROTOCOL_VERSION
    );
    assert_eq!(session.state(), SessionState::Initializing);

    // Still gated until the initialized notification is observed.
    peer.send(JsonRpcRequest::new(3, "tools/list", None)).await;
    let response = peer.expect_response().await;
    assert_eq!(response.error_object().unwrap().code, -32002);

    peer.send(JsonRpcNotification::new("notifications/initialized", None))
        .await;
    tokio::task::yield_now().await;
    assert_eq!(session.state(), SessionState::Ready);

    peer.send(JsonRpcRequest::new(4, "tools/list", None)).await;
    let response = peer.expect_response().await;
    assert_eq!(response.result().unwrap()["echo"], "tools/list");
}

#[tokio::test]
async fn ping_is_answered_by_the_engine() {
    let (_session, mut peer) = server_session_with_scripted_client().await;

    peer.send(JsonRpcRequest::new(
        1,
        "initialize",
        Some(json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "1"},
        })),
    ))
    .await;
    peer.expect_response().await;
    peer.send(JsonRpcNotification::new("notifications/initialized", None))
        .await;

    peer.send(JsonRpcRequest::new(2, "ping", None)).await;
    let response = peer.expect_response().await;
    assert_eq!(response.result().unwrap(), &json!({}));
}
