//! In-memory transport pair.
//!
//! Two endpoints wired back to back: `send` on one posts the frame directly
//! to the other's message subscribers, synchronously and in order. This is
//! the test harness for every end-to-end session scenario, and doubles as a
//! same-process client/server wiring.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use duplexmcp_protocol::JsonRpcMessage;
use parking_lot::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::events::{SubscriberSet, Subscription};
use crate::traits::{ErrorHandler, MessageHandler, Transport, TransportState};

#[derive(Debug)]
struct Endpoint {
    label: &'static str,
    state: Mutex<TransportState>,
    messages: SubscriberSet<JsonRpcMessage>,
    errors: SubscriberSet<TransportError>,
    peer: Mutex<Option<Weak<Endpoint>>>,
}

impl Endpoint {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            state: Mutex::new(TransportState::Disconnected),
            messages: SubscriberSet::new(),
            errors: SubscriberSet::new(),
            peer: Mutex::new(None),
        })
    }
}

/// One endpoint of an in-memory transport pair.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    inner: Arc<Endpoint>,
}

impl InMemoryTransport {
    /// Create two connected-in-spirit endpoints. Each still needs `connect`
    /// before traffic flows.
    pub fn pair() -> (Self, Self) {
        let a = Endpoint::new("memory-a");
        let b = Endpoint::new("memory-b");
        *a.peer.lock() = Some(Arc::downgrade(&b));
        *b.peer.lock() = Some(Arc::downgrade(&a));
        (Self { inner: a }, Self { inner: b })
    }

    /// Create an endpoint with no peer. `connect` on it fails with
    /// `NotPaired`; useful for exercising connection-failure paths.
    pub fn unpaired() -> Self {
        Self {
            inner: Endpoint::new("memory-unpaired"),
        }
    }

    fn peer(&self) -> TransportResult<Arc<Endpoint>> {
        self.inner
            .peer
            .lock()
            .as_ref()
            .ok_or(TransportError::NotPaired)?
            .upgrade()
            .ok_or_else(|| TransportError::Closed("peer endpoint dropped".into()))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> TransportResult<()> {
        if self.inner.peer.lock().is_none() {
            return Err(TransportError::NotPaired);
        }
        let mut state = self.inner.state.lock();
        if *state == TransportState::Connected {
            return Err(TransportError::AlreadyConnected);
        }
        *state = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != TransportState::Connected {
                return Ok(());
            }
            *state = TransportState::Disconnected;
        }
        self.inner.messages.clear();
        self.inner.errors.clear();

        // Let the peer's session observe the loss as a fatal transport error.
        if let Ok(peer) = self.peer()
            && *peer.state.lock() == TransportState::Connected
        {
            peer.errors
                .emit(&TransportError::Closed("peer disconnected".into()));
        }
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        if *self.inner.state.lock() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let peer = self.peer()?;
        if *peer.state.lock() != TransportState::Connected {
            return Err(TransportError::Closed("peer endpoint is not connected".into()));
        }
        peer.messages.emit(&message);
        Ok(())
    }

    fn subscribe_messages(&self, handler: MessageHandler) -> Subscription {
        self.inner.messages.subscribe(handler)
    }

    fn subscribe_errors(&self, handler: ErrorHandler) -> Subscription {
        self.inner.errors.subscribe(handler)
    }

    fn is_connected(&self) -> bool {
        *self.inner.state.lock() == TransportState::Connected
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("memory://{}", self.inner.label))
    }
}
