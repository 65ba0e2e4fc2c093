//! The transport boundary: a filtered event subscription service.
//!
//! The relay network itself is out of scope; sessions consume exactly this
//! contract. A [`Transport`] delivers every envelope matching a filter to
//! the subscription's callback and accepts envelopes for publication.
//! Unsubscribing is a plain token — a boxed closure owned by the caller —
//! so the transport never holds a strong reference back into session
//! state.
//!
//! [`InMemoryRelay`] is a loopback implementation for tests and examples:
//! publishing routes an envelope synchronously to every matching live
//! subscription.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::envelope::{Envelope, Filter};

/// Cancels one subscription. Dropping it without calling leaks the
/// subscription until the transport itself goes away.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Callback invoked once per delivered envelope.
pub type EventCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Capability record handed to sessions at construction.
pub trait Transport: Send + Sync {
    /// Deliver every envelope matching `filter` to `on_event` until the
    /// returned token is invoked.
    fn subscribe(&self, filter: Filter, on_event: EventCallback) -> Unsubscribe;

    /// Publish an envelope. Sessions never call this themselves; the
    /// caller publishes what `send` and invite acceptance return.
    fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

// ── In-memory loopback relay ───────────────────────────────────────

/// A process-local relay: subscriptions and publishes short-circuit in
/// memory. No persistence, no network.
#[derive(Default)]
pub struct InMemoryRelay {
    inner: Arc<Mutex<RelayInner>>,
}

#[derive(Default)]
struct RelayInner {
    next_id: u64,
    subscriptions: HashMap<u64, (Filter, EventCallback)>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions (for tests).
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }
}

impl Transport for InMemoryRelay {
    fn subscribe(&self, filter: Filter, on_event: EventCallback) -> Unsubscribe {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.insert(id, (filter, on_event));

        let weak = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscriptions.remove(&id);
            }
        })
    }

    fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        // Collect matching callbacks first so the relay lock is not held
        // while sessions process the event (they may resubscribe).
        let matching: Vec<EventCallback> = self
            .inner
            .lock()
            .subscriptions
            .values()
            .filter(|(filter, _)| filter.matches(&envelope))
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in matching {
            callback(envelope.clone());
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn envelope(kind: u16, author: &Keypair) -> Envelope {
        Envelope::build(kind, "x".to_string(), Vec::new(), author).unwrap()
    }

    #[test]
    fn routes_matching_events_only() {
        let relay = InMemoryRelay::new();
        let author = Keypair::generate();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let unsub = relay.subscribe(
            Filter::new().authors(vec![author.public_hex()]).kinds(vec![7]),
            Arc::new(move |envelope| sink.lock().push(envelope.id.clone())),
        );

        relay.publish(envelope(7, &author)).unwrap();
        relay.publish(envelope(8, &author)).unwrap();
        relay.publish(envelope(7, &Keypair::generate())).unwrap();

        assert_eq!(seen.lock().len(), 1);
        unsub();
        assert_eq!(relay.subscription_count(), 0);
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let relay = InMemoryRelay::new();
        let author = Keypair::generate();

        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let unsub = relay.subscribe(
            Filter::new().kinds(vec![7]),
            Arc::new(move |_| *sink.lock() += 1),
        );

        relay.publish(envelope(7, &author)).unwrap();
        unsub();
        relay.publish(envelope(7, &author)).unwrap();

        assert_eq!(*seen.lock(), 1);
    }
}
