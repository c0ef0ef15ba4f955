// Per-variable change notification bus.
// The store is the only publisher; anything may subscribe.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::trail::CausalTrail;
use crate::value::{Value, VarId, VarKind};

/// Payload delivered to every subscriber after a successful mutation
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub id: VarId,
    pub kind: VarKind,
    pub new_value: Value,
    pub former_value: Value,
    /// Name of the object that requested the mutation
    pub originator: String,
    /// Accumulated diagnostic record of what led here
    pub trail: CausalTrail,
}

/// Callback invoked synchronously on the publishing thread
pub type ChangeHandler = Box<dyn FnMut(&ChangeEvent) + Send>;

/// Handle returned by `subscribe`, used to cancel the registration.
/// Avoids the accidental double-subscription problem of comparing
/// callbacks by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    id: VarId,
    handle: u64,
}

impl SubscriptionToken {
    pub fn variable_id(&self) -> VarId {
        self.id
    }
}

/// Ordered multicast registry keyed by variable id.
///
/// Handlers run synchronously, in subscription order, on the caller's
/// thread. A panicking handler is isolated: it is logged and the publish
/// loop continues with the remaining subscribers.
#[derive(Default)]
pub struct EventBus {
    subscriptions: HashMap<VarId, Vec<(u64, ChangeHandler)>>,
    next_handle: u64,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            subscriptions: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Register a handler for changes to `id`
    pub fn subscribe(&mut self, id: VarId, handler: ChangeHandler) -> SubscriptionToken {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.subscriptions.entry(id).or_default().push((handle, handler));
        debug!(target: "events", "Subscribed handler {} to variable {}", handle, id);
        SubscriptionToken { id, handle }
    }

    /// Remove a registration. Unsubscribing a token that is not present
    /// is a silent no-op.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        if let Some(handlers) = self.subscriptions.get_mut(&token.id) {
            handlers.retain(|(handle, _)| *handle != token.handle);
            if handlers.is_empty() {
                self.subscriptions.remove(&token.id);
            }
        }
    }

    /// Number of handlers currently registered for `id`
    pub fn subscriber_count(&self, id: VarId) -> usize {
        self.subscriptions.get(&id).map(|h| h.len()).unwrap_or(0)
    }

    /// Invoke all handlers registered for the event's id, in
    /// subscription order
    pub fn publish(&mut self, event: &ChangeEvent) {
        let Some(handlers) = self.subscriptions.get_mut(&event.id) else {
            return;
        };

        for (handle, handler) in handlers.iter_mut() {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if let Err(e) = result {
                error!(target: "events",
                    "Handler {} for variable {} panicked: {:?}",
                    handle, event.id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(id: VarId) -> ChangeEvent {
        ChangeEvent {
            id,
            kind: VarKind::Int,
            new_value: Value::Int(1),
            former_value: Value::Int(0),
            originator: "test".to_string(),
            trail: CausalTrail::new(),
        }
    }

    #[test]
    fn test_publish_invokes_in_subscription_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(7, Box::new(move |_| order.lock().unwrap().push(tag)));
        }

        bus.publish(&event(7));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_publish_only_reaches_matching_id() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe(7, Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(&event(8));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.publish(&event(7));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_silent_noop_when_absent() {
        let mut bus = EventBus::new();
        let token = bus.subscribe(1, Box::new(|_| {}));
        bus.unsubscribe(token);
        assert_eq!(bus.subscriber_count(1), 0);

        // second removal of the same token does nothing
        bus.unsubscribe(token);
        assert_eq!(bus.subscriber_count(1), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_the_loop() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(1, Box::new(|_| panic!("boom")));
        let c = count.clone();
        bus.subscribe(1, Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(&event(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
