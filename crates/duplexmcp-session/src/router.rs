//! The notification router: fan-out of inbound notifications to observers.
//!
//! Built-in notifications (progress, cancellation) are handled by the session
//! itself because they touch the pending table; everything else lands here.
//! Observers are invoked in registration order; an observer returning an
//! error is reported to the session's error observers and never prevents
//! invocation of later observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use duplexmcp_protocol::jsonrpc::JsonRpcNotification;
use duplexmcp_protocol::types::{
    LogMessageParams, ResourceUpdatedParams, Root, SamplingMessage,
};
use duplexmcp_protocol::{McpError, McpResult};
use duplexmcp_transport::{SubscriberSet, Subscription};

/// Fallible observer over payloads of type `P`.
pub type Observer<P> = Arc<dyn Fn(&P) -> McpResult<()> + Send + Sync>;

/// Registration-ordered set of fallible observers. The error-tolerant
/// sibling of [`SubscriberSet`]: a failing observer's error goes to the
/// supplied error sink instead of stopping the fan-out.
struct ObserverSet<P> {
    inner: Arc<ObserverSetInner<P>>,
}

struct ObserverSetInner<P> {
    next_token: AtomicU64,
    entries: Mutex<Vec<(u64, Observer<P>)>>,
}

impl<P> Clone for ObserverSet<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for ObserverSet<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ObserverSetInner {
                next_token: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<P: 'static> ObserverSet<P> {
    fn subscribe(&self, observer: Observer<P>) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((token, observer));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.entries.lock().retain(|(t, _)| *t != token);
            }
        })
    }

    fn emit(&self, payload: &P, errors: &SubscriberSet<McpError>) {
        let observers: Vec<Observer<P>> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            if let Err(e) = observer(payload) {
                tracing::warn!(error = %e, "notification observer failed");
                errors.emit(&e);
            }
        }
    }

    fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }
}

/// Observer registries for every routed notification kind.
#[derive(Default)]
pub struct NotificationRouter {
    resource_updated: Mutex<HashMap<String, ObserverSet<ResourceUpdatedParams>>>,
    resource_list_changed: ObserverSet<()>,
    message_created: ObserverSet<SamplingMessage>,
    roots_changed: ObserverSet<Vec<Root>>,
    log_messages: ObserverSet<LogMessageParams>,
    generic: ObserverSet<JsonRpcNotification>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter").finish_non_exhaustive()
    }
}

impl NotificationRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe updates for one resource uri.
    pub fn on_resource_updated(
        &self,
        uri: impl Into<String>,
        observer: Observer<ResourceUpdatedParams>,
    ) -> Subscription {
        self.resource_updated
            .lock()
            .entry(uri.into())
            .or_default()
            .subscribe(observer)
    }

    /// Observe resource list changes.
    pub fn on_resource_list_changed(&self, observer: Observer<()>) -> Subscription {
        self.resource_list_changed.subscribe(observer)
    }

    /// Observe created sampling messages.
    pub fn on_message_created(&self, observer: Observer<SamplingMessage>) -> Subscription {
        self.message_created.subscribe(observer)
    }

    /// Observe roots list changes.
    pub fn on_roots_changed(&self, observer: Observer<Vec<Root>>) -> Subscription {
        self.roots_changed.subscribe(observer)
    }

    /// Observe server log messages.
    pub fn on_log_message(&self, observer: Observer<LogMessageParams>) -> Subscription {
        self.log_messages.subscribe(observer)
    }

    /// Observe every notification the session has no built-in route for.
    pub fn on_notification(&self, observer: Observer<JsonRpcNotification>) -> Subscription {
        self.generic.subscribe(observer)
    }

    /// Drop a uri's observer set entirely (local unsubscribe).
    pub fn remove_resource_observers(&self, uri: &str) {
        self.resource_updated.lock().remove(uri);
    }

    pub(crate) fn emit_resource_updated(
        &self,
        params: &ResourceUpdatedParams,
        errors: &SubscriberSet<McpError>,
    ) {
        let set = self.resource_updated.lock().get(&params.uri).cloned();
        if let Some(set) = set {
            set.emit(params, errors);
        }
    }

    pub(crate) fn emit_resource_list_changed(&self, errors: &SubscriberSet<McpError>) {
        self.resource_list_changed.emit(&(), errors);
    }

    pub(crate) fn emit_message_created(
        &self,
        message: &SamplingMessage,
        errors: &SubscriberSet<McpError>,
    ) {
        self.message_created.emit(message, errors);
    }

    pub(crate) fn emit_roots_changed(&self, roots: &[Root], errors: &SubscriberSet<McpError>) {
        self.roots_changed.emit(&roots.to_vec(), errors);
    }

    pub(crate) fn emit_log_message(
        &self,
        params: &LogMessageParams,
        errors: &SubscriberSet<McpError>,
    ) {
        self.log_messages.emit(params, errors);
    }

    pub(crate) fn emit_generic(
        &self,
        notification: &JsonRpcNotification,
        errors: &SubscriberSet<McpError>,
    ) {
        if self.generic.is_empty() {
            tracing::debug!(method = %notification.method, "unrouted notification");
        }
        self.generic.emit(notification, errors);
    }

    /// Clear every registry, on session close.
    pub(crate) fn clear(&self) {
        self.resource_updated.lock().clear();
        self.resource_list_changed.clear();
        self.message_created.clear();
        self.roots_changed.clear();
        self.log_messages.clear();
        self.generic.clear();
    }
}
