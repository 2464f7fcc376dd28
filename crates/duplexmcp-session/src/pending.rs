//! The pending table: outbound request ids mapped to one-shot awaiters.
//!
//! An entry is inserted before its request frame is handed to the transport,
//! and removed exactly once, by whichever settles the request first: a
//! matching response, a matching error response, the deadline, an inbound
//! cancellation, or session close. Entries are independent; settling one
//! never affects another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use duplexmcp_protocol::{McpError, McpResult, ProgressToken, RequestId};

/// Caller-supplied observer for out-of-band progress updates, invoked with
/// `(progress, total?)` in wire-arrival order.
pub type ProgressSink = Arc<dyn Fn(f64, Option<f64>) + Send + Sync>;

/// One in-flight outbound request.
pub struct PendingEntry {
    /// Settles the caller's awaiter.
    pub tx: oneshot::Sender<McpResult<Value>>,
    /// Progress token attached to the request, if the caller opted in.
    pub progress_token: Option<ProgressToken>,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("progress_token", &self.progress_token)
            .finish_non_exhaustive()
    }
}

/// Concurrency-safe map from outbound request id to pending entry.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Ids are allocated monotonically and never reused
    /// within a session, so an occupied slot is a bug upstream.
    pub fn insert(
        &self,
        id: RequestId,
        tx: oneshot::Sender<McpResult<Value>>,
        progress_token: Option<ProgressToken>,
    ) -> McpResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(McpError::internal(format!(
                "Duplicate pending request id: {id}"
            )));
        }
        entries.insert(id, PendingEntry { tx, progress_token });
        Ok(())
    }

    /// Remove and return the entry for `id`, if any. The caller settles it.
    pub fn remove(&self, id: &RequestId) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    /// Remove every entry, for settlement on session close.
    pub fn drain(&self) -> Vec<PendingEntry> {
        self.entries.lock().drain().map(|(_, e)| e).collect()
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map from progress token to the caller's sink.
///
/// Sinks are registered before the request frame is transmitted and
/// deregistered when the request settles, so a late progress notification
/// for a settled request is a no-op.
#[derive(Default)]
pub struct ProgressRegistry {
    sinks: Mutex<HashMap<ProgressToken, ProgressSink>>,
}

impl std::fmt::Debug for ProgressRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressRegistry")
            .field("len", &self.sinks.lock().len())
            .finish()
    }
}

impl ProgressRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink to a token.
    pub fn register(&self, token: ProgressToken, sink: ProgressSink) {
        self.sinks.lock().insert(token, sink);
    }

    /// Detach a token's sink.
    pub fn unregister(&self, token: &ProgressToken) {
        self.sinks.lock().remove(token);
    }

    /// Look up the sink for a token.
    pub fn get(&self, token: &ProgressToken) -> Option<ProgressSink> {
        self.sinks.lock().get(token).cloned()
    }

    /// Drop every sink.
    pub fn clear(&self) {
        self.sinks.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn settle_resolves_only_the_matching_awaiter() {
        let table = PendingTable::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        table.insert(RequestId::Number(1), tx_a, None).unwrap();
        table.insert(RequestId::Number(2), tx_b, None).unwrap();

        let entry = table.remove(&RequestId::Number(1)).unwrap();
        entry.tx.send(Ok(json!({"ok": true}))).unwrap();

        assert_eq!(rx_a.await.unwrap().unwrap()["ok"], true);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let table = PendingTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        table.insert(RequestId::Number(1), tx1, None).unwrap();
        assert!(table.insert(RequestId::Number(1), tx2, None).is_err());
    }

    #[test]
    fn remove_unknown_id_is_none() {
        let table = PendingTable::new();
        assert!(table.remove(&RequestId::from("nope")).is_none());
    }

    #[tokio::test]
    async fn drain_takes_everything() {
        let table = PendingTable::new();
        for i in 0..3 {
            let (tx, _rx) = oneshot::channel();
            table.insert(RequestId::Number(i), tx, None).unwrap();
        }
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }

    #[test]
    fn progress_registry_round_trip() {
        let registry = ProgressRegistry::new();
        let token = ProgressToken::from(7);
        registry.register(token.clone(), Arc::new(|_, _| {}));
        assert!(registry.get(&token).is_some());
        registry.unregister(&token);
        assert!(registry.get(&token).is_none());
    }
}
