//! Broadcast of processed events to subscribers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct BusInner<E> {
    next_token: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<E>)>>,
}

/// Multi-subscriber broadcast channel.
///
/// Subscribers run in registration order. The subscriber list is copied
/// before delivery, so callbacks may subscribe or unsubscribe freely; no lock
/// is held while a callback runs.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                next_token: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback; it stays registered until the guard is dropped
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push((token, Arc::new(callback)));

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().retain(|(t, _)| *t != token);
            }
        })
    }

    /// Deliver an event to every current subscriber
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

/// RAII guard for a registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A guard with nothing to tear down
    pub fn empty() -> Self {
        Subscription { teardown: None }
    }

    /// Explicitly unsubscribe (same as dropping)
    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    /// Keep the registration alive for as long as the source lives
    pub fn detach(mut self) {
        self.teardown = None;
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = {
            let seen = seen.clone();
            bus.subscribe(move |e| seen.lock().push(("first", *e)))
        };
        let s2 = {
            let seen = seen.clone();
            bus.subscribe(move |e| seen.lock().push(("second", *e)))
        };

        bus.emit(&7);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
        drop((s1, s2));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let sub = {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            })
        };
        bus.emit(&1);
        drop(sub);
        bus.emit(&2);

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_detach_keeps_registration() {
        let bus: EventBus<u32> = EventBus::new();
        bus.subscribe(|_| {}).detach();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
