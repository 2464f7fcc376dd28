//! Server-Sent Events client transport.
//!
//! Server → client frames ride the SSE `data:` field of a long-lived GET
//! stream; client → server frames are out-of-band HTTP POSTs. The server may
//! announce the POST url with an `endpoint` event before any JSON-RPC frame
//! flows; until then the configured `post_path` is used.
//!
//! Reconnection policy is deliberately absent: when the SSE stream ends, the
//! transport closes and reports it, and the owner decides what to do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use duplexmcp_protocol::{JsonRpcMessage, codec};

use crate::error::{TransportError, TransportResult};
use crate::events::{SubscriberSet, Subscription};
use crate::traits::{ErrorHandler, MessageHandler, Transport, TransportState};

/// SSE client transport configuration.
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// Base URL of the server (e.g. `http://localhost:3000`)
    pub base_url: String,
    /// SSE endpoint path, relative to `base_url`
    pub sse_path: String,
    /// POST endpoint path, relative to `base_url`; overridden by an
    /// `endpoint` SSE event when the server sends one
    pub post_path: String,
    /// Extra headers applied to both the GET and the POSTs
    pub headers: Vec<(String, String)>,
    /// Timeout for each POST
    pub request_timeout: Duration,
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            sse_path: "/sse".to_string(),
            post_path: "/rpc".to_string(),
            headers: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

/// Incremental parser for the SSE wire grammar: `field: value` lines,
/// multi-line `data:` accumulation, `:` comments, blank-line dispatch.
#[derive(Debug, Default)]
struct SseEventParser {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseEventParser {
    /// Feed one line (without its terminator). Returns a complete event when
    /// the line was the blank separator of a non-empty event.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                self.event = None;
                return None;
            }
            let event = SseEvent {
                event: self.event.take(),
                data: self.data_lines.join("\n"),
            };
            self.data_lines.clear();
            return Some(event);
        }
        if line.starts_with(':') {
            return None; // comment / keep-alive
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // `id` and `retry` would matter for resume policy, which is out
            // of scope here.
            _ => {}
        }
        None
    }
}

/// SSE + HTTP POST client transport.
pub struct SseClientTransport {
    config: SseClientConfig,
    http: reqwest::Client,
    state: Arc<Mutex<TransportState>>,
    messages: SubscriberSet<JsonRpcMessage>,
    errors: SubscriberSet<TransportError>,
    post_url: Arc<Mutex<Url>>,
    sse_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for SseClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClientTransport")
            .field("base_url", &self.config.base_url)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SseClientTransport {
    /// Create a transport for the given configuration.
    pub fn new(config: SseClientConfig) -> TransportResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid base url: {e}")))?;
        let post_url = base
            .join(&config.post_path)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid post path: {e}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            config,
            http,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            messages: SubscriberSet::new(),
            errors: SubscriberSet::new(),
            post_url: Arc::new(Mutex::new(post_url)),
            sse_task: Mutex::new(None),
        })
    }

    fn sse_url(&self) -> TransportResult<Url> {
        Url::parse(&self.config.base_url)
            .and_then(|base| base.join(&self.config.sse_path))
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid sse url: {e}")))
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        request
    }

    fn handle_event(
        event: SseEvent,
        base_url: &str,
        post_url: &Arc<Mutex<Url>>,
        messages: &SubscriberSet<JsonRpcMessage>,
        errors: &SubscriberSet<TransportError>,
    ) {
        match event.event.as_deref() {
            Some("endpoint") => {
                // The server told us where to POST.
                let resolved = Url::parse(base_url).and_then(|base| base.join(event.data.trim()));
                match resolved {
                    Ok(url) => {
                        debug!(%url, "sse endpoint event received");
                        *post_url.lock() = url;
                    }
                    Err(e) => {
                        errors.emit(&TransportError::Http(format!("bad endpoint event: {e}")));
                    }
                }
            }
            _ => match codec::decode_str(&event.data) {
                Ok(message) => messages.emit(&message),
                Err(e) => {
                    warn!(error = %e, "dropping malformed sse frame");
                    errors.emit(&TransportError::Protocol(e));
                }
            },
        }
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn connect(&self) -> TransportResult<()> {
        if *self.state.lock() == TransportState::Connected {
            return Err(TransportError::AlreadyConnected);
        }
        let url = self.sse_url()?;
        let response = self
            .apply_headers(self.http.get(url.clone()).header("Accept", "text/event-stream"))
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "sse endpoint returned {}",
                response.status()
            )));
        }

        let messages = self.messages.clone();
        let errors = self.errors.clone();
        let state = Arc::clone(&self.state);
        let post_url = Arc::clone(&self.post_url);
        let base_url = self.config.base_url.clone();

        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseEventParser::default();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let line = line.trim_end_matches(['\n', '\r']);
                            if let Some(event) = parser.push_line(line) {
                                Self::handle_event(
                                    event, &base_url, &post_url, &messages, &errors,
                                );
                            }
                        }
                    }
                    Err(e) => {
                        errors.emit(&TransportError::ReceiveFailed(e.to_string()));
                    }
                }
            }
            debug!("sse stream ended");
            *state.lock() = TransportState::Closed;
            errors.emit(&TransportError::Closed("sse stream ended".into()));
        });

        *self.sse_task.lock() = Some(task);
        *self.state.lock() = TransportState::Connected;
        debug!(endpoint = %url, "sse transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Connected {
                return Ok(());
            }
            *state = TransportState::Disconnected;
        }
        if let Some(task) = self.sse_task.lock().take() {
            task.abort();
        }
        self.messages.clear();
        self.errors.clear();
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        if *self.state.lock() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let body = codec::encode_message(&message).map_err(TransportError::Protocol)?;
        let url = self.post_url.lock().clone();

        let response = self
            .apply_headers(
                self.http
                    .post(url)
                    .header("Content-Type", "application/json")
                    .timeout(self.config.request_timeout)
                    .body(body),
            )
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "post endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn subscribe_messages(&self, handler: MessageHandler) -> Subscription {
        self.messages.subscribe(handler)
    }

    fn subscribe_errors(&self, handler: ErrorHandler) -> Subscription {
        self.errors.subscribe(handler)
    }

    fn is_connected(&self) -> bool {
        *self.state.lock() == TransportState::Connected
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.base_url.clone())
    }
}
