//! Standard-stream transport.
//!
//! Newline-delimited JSON in both directions: every frame is one line, the
//! codec buffers partial lines across chunks. Runs over the current
//! process's stdin/stdout by default, or over arbitrary async streams via
//! [`StdioTransport::from_raw`] (which is also the test seam).
//!
//! Lock discipline follows the usual hybrid: `parking_lot` for state that is
//! never held across `.await`, `tokio::sync::Mutex` for the writer half that
//! is.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};

use duplexmcp_protocol::{JsonRpcMessage, codec};

use crate::error::{TransportError, TransportResult};
use crate::events::{SubscriberSet, Subscription};
use crate::traits::{ErrorHandler, MessageHandler, Transport, TransportState};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Where the transport gets its streams from.
enum StreamSource {
    /// The current process's stdin/stdout; can be re-acquired on reconnect.
    ProcessStdio,
    /// Caller-supplied streams; consumed by the first connect.
    Raw {
        reader: Option<BoxedReader>,
        writer: Option<BoxedWriter>,
    },
}

/// Newline-delimited JSON transport over standard streams.
pub struct StdioTransport {
    state: Arc<Mutex<TransportState>>,
    messages: SubscriberSet<JsonRpcMessage>,
    errors: SubscriberSet<TransportError>,
    source: Mutex<StreamSource>,
    writer: Arc<TokioMutex<Option<FramedWrite<BoxedWriter, LinesCodec>>>>,
    read_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    /// Transport over the current process's stdin/stdout.
    pub fn new() -> Self {
        Self::with_source(StreamSource::ProcessStdio)
    }

    /// Transport over caller-supplied streams (a child process's pipes, a
    /// `tokio::io::duplex` in tests, …).
    pub fn from_raw(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self::with_source(StreamSource::Raw {
            reader: Some(Box::pin(reader)),
            writer: Some(Box::pin(writer)),
        })
    }

    fn with_source(source: StreamSource) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            messages: SubscriberSet::new(),
            errors: SubscriberSet::new(),
            source: Mutex::new(source),
            writer: Arc::new(TokioMutex::new(None)),
            read_task: Mutex::new(None),
        }
    }

    fn take_streams(&self) -> TransportResult<(BoxedReader, BoxedWriter)> {
        let mut source = self.source.lock();
        match &mut *source {
            StreamSource::ProcessStdio => Ok((
                Box::pin(tokio::io::stdin()) as BoxedReader,
                Box::pin(tokio::io::stdout()) as BoxedWriter,
            )),
            StreamSource::Raw { reader, writer } => {
                match (reader.take(), writer.take()) {
                    (Some(r), Some(w)) => Ok((r, w)),
                    _ => Err(TransportError::ConnectionFailed(
                        "raw streams already consumed".into(),
                    )),
                }
            }
        }
    }

    fn spawn_read_task(&self, reader: BoxedReader) -> tokio::task::JoinHandle<()> {
        let messages = self.messages.clone();
        let errors = self.errors.clone();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut framed = FramedRead::new(reader, LinesCodec::new());
            while let Some(item) = framed.next().await {
                match item {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match codec::decode_str(&line) {
                            Ok(message) => {
                                trace!(method = ?message.method(), "stdio frame received");
                                messages.emit(&message);
                            }
                            Err(e) => {
                                warn!(error = %e, "dropping malformed stdio frame");
                                errors.emit(&TransportError::Protocol(e));
                            }
                        }
                    }
                    Err(e) => {
                        errors.emit(&TransportError::ReceiveFailed(e.to_string()));
                    }
                }
            }
            debug!("stdio stream ended");
            *state.lock() = TransportState::Closed;
            errors.emit(&TransportError::Closed("end of stream".into()));
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> TransportResult<()> {
        if *self.state.lock() == TransportState::Connected {
            return Err(TransportError::AlreadyConnected);
        }
        let (reader, writer) = self.take_streams()?;
        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));
        let task = self.spawn_read_task(reader);
        *self.read_task.lock() = Some(task);
        *self.state.lock() = TransportState::Connected;
        debug!("stdio transport connected");
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
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = futures::SinkExt::<String>::close(&mut writer).await;
        }
        self.messages.clear();
        self.errors.clear();
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        if *self.state.lock() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let line = codec::encode_message(&message).map_err(TransportError::Protocol)?;

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(line)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
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
        Some("stdio://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_protocol::jsonrpc::JsonRpcRequest;
    use tokio::io::AsyncWriteExt;

    async fn settle() {
        // Give the read task a chance to drain what was just written.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn frames_and_partial_lines() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let transport = StdioTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            transport.subscribe_messages(Arc::new(move |m: &JsonRpcMessage| {
                seen.lock().push(m.clone());
            }));
        }

        // One whole frame, then a frame split across two writes.
        far.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        far.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifica")
            .await
            .unwrap();
        settle().await;
        assert_eq!(seen.lock().len(), 1);

        far.write_all(b"tions/initialized\"}\n").await.unwrap();
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].method(), Some("notifications/initialized"));
    }

    #[tokio::test]
    async fn malformed_line_goes_to_error_subscribers() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let transport = StdioTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        let frames = Arc::new(Mutex::new(0usize));
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let frames = Arc::clone(&frames);
            transport.subscribe_messages(Arc::new(move |_: &JsonRpcMessage| {
                *frames.lock() += 1;
            }));
            let errors = Arc::clone(&errors);
            transport.subscribe_errors(Arc::new(move |e: &TransportError| {
                errors.lock().push(e.to_string());
            }));
        }

        far.write_all(b"this is not json\n").await.unwrap();
        far.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        settle().await;

        // The loop survived the bad line and still delivered the good one.
        assert_eq!(*frames.lock(), 1);
        assert_eq!(errors.lock().len(), 1);
        assert!(errors.lock()[0].contains("Parse error"));
    }

    #[tokio::test]
    async fn eof_emits_closed() {
        let (near, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let transport = StdioTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            transport.subscribe_errors(Arc::new(move |e: &TransportError| {
                errors.lock().push(e.to_string());
            }));
        }

        drop(far);
        settle().await;
        assert!(errors.lock().iter().any(|e| e.contains("end of stream")));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_writes_one_line_per_frame() {
        let (near, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let transport = StdioTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();

        transport
            .send(JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None)))
            .await
            .unwrap();
        transport
            .send(JsonRpcMessage::Request(JsonRpcRequest::new(2, "ping", None)))
            .await
            .unwrap();

        let mut lines = FramedRead::new(far, LinesCodec::new());
        let first = lines.next().await.unwrap().unwrap();
        let second = lines.next().await.unwrap().unwrap();
        assert!(first.contains("\"id\":1"));
        assert!(second.contains("\"id\":2"));
    }

    #[tokio::test]
    async fn send_after_disconnect_fails() {
        let (near, _far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let transport = StdioTransport::from_raw(read_half, write_half);
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();

        let err = transport
            .send(JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
