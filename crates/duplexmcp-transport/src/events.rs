//! Typed observer registry.
//!
//! [`SubscriberSet`] is the small pubsub primitive every transport (and the
//! session's own observer registries) is built on: handlers are invoked in
//! registration order, each subscription returns an explicit unsubscribe
//! handle, and one handler never prevents delivery to the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Inner<P> {
    next_token: AtomicU64,
    entries: Mutex<Vec<(u64, Handler<P>)>>,
}

/// An ordered set of subscribers over payloads of type `P`.
///
/// Cloning is cheap and shares the underlying set, so a transport can hand a
/// clone to its background read task.
pub struct SubscriberSet<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for SubscriberSet<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: 'static> Default for SubscriberSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> std::fmt::Debug for SubscriberSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<P: 'static> SubscriberSet<P> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_token: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler. Handlers are invoked in registration order.
    pub fn subscribe(&self, handler: Handler<P>) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((token, handler));

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.entries.lock().retain(|(t, _)| *t != token);
                }
            })),
        }
    }

    /// Register a plain closure.
    pub fn subscribe_fn(&self, handler: impl Fn(&P) + Send + Sync + 'static) -> Subscription {
        self.subscribe(Arc::new(handler))
    }

    /// Deliver `payload` to every subscriber in registration order.
    ///
    /// Handlers are cloned out of the lock first, so a handler may subscribe
    /// or unsubscribe reentrantly without deadlocking.
    pub fn emit(&self, payload: &P) {
        let handlers: Vec<Handler<P>> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(payload);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// True when no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unsubscribe handle returned by [`SubscriberSet::subscribe`].
///
/// Dropping the handle does NOT unsubscribe; call [`Subscription::unsubscribe`]
/// explicitly. This keeps fire-and-forget subscriptions (the common case for
/// a session that lives as long as its transport) from needing handle
/// storage.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Build a handle around an arbitrary detach action. Downstream observer
    /// registries (the session's notification router) use this to hand out
    /// the same handle type the transports do.
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Remove the handler from its set. A handle whose set is already gone
    /// is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
