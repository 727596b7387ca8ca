//! Named-event broadcast.
//!
//! Listeners receive the event and a reference to the state that fired it and
//! re-read whatever they need from there.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::models::ConsentKey;

pub const IS_LOADED: &str = "isLoaded";
pub const CMP_READY: &str = "cmpReady";
pub const CONSENT_CHANGED: &str = "consentChanged";
pub const CATALOG_UPDATED: &str = "catalogUpdated";

/// Which remote catalog was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CatalogKind {
    Vendors,
    Purposes,
}

/// A state transition external listeners can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpEvent {
    IsLoaded,
    CmpReady,
    ConsentChanged(ConsentKey),
    CatalogUpdated(CatalogKind),
}

impl CmpEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CmpEvent::IsLoaded => IS_LOADED,
            CmpEvent::CmpReady => CMP_READY,
            CmpEvent::ConsentChanged(_) => CONSENT_CHANGED,
            CmpEvent::CatalogUpdated(_) => CATALOG_UPDATED,
        }
    }
}

/// Event callback.
pub type Listener<S> = Arc<dyn Fn(&CmpEvent, &S) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

struct Subscription<S> {
    id: SubscriptionId,
    event: String,
    listener: Listener<S>,
}

/// Synchronous pub/sub keyed by event name.
pub struct Notifier<S> {
    next_id: u64,
    subscriptions: Vec<Subscription<S>>,
}

impl<S> Default for Notifier<S> {
    fn default() -> Self {
        Self {
            next_id: 1,
            subscriptions: Vec::new(),
        }
    }
}

impl<S> fmt::Debug for Notifier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl<S> Notifier<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event: &str, listener: Listener<S>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            event: event.to_string(),
            listener,
        });
        id
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Invoke every listener registered for the event's name, in subscription order.
    pub fn notify(&self, event: &CmpEvent, state: &S) {
        let name = event.name();
        let mut delivered = 0usize;
        for subscription in self.subscriptions.iter().filter(|s| s.event == name) {
            (subscription.listener)(event, state);
            delivered += 1;
        }
        tracing::debug!("Notified {} listener(s) of {}", delivered, name);
    }
}
