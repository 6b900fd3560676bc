// src/publisher.rs
//
// Last-known position state and the observer registry. Subscribers are
// notified synchronously, in subscription order, on the acquisition task;
// a panicking subscriber is isolated so the rest still get the update.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::io::Position;

/// Callback invoked with each newly decoded position
pub type PositionCallback = Box<dyn Fn(Position) + Send + Sync>;

/// Opaque handle identifying one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

struct Registry {
    last_position: Option<Position>,
    next_handle: u64,
    // Vec, not a map: delivery order is subscription order
    subscribers: Vec<(CallbackHandle, Arc<PositionCallback>)>,
}

/// Holds the last decoded position and fans out change notifications.
pub struct PositionPublisher {
    registry: Mutex<Registry>,
}

impl PositionPublisher {
    pub fn new() -> Self {
        PositionPublisher {
            registry: Mutex::new(Registry {
                last_position: None,
                next_handle: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Last decoded position, or None before the first successful decode.
    pub fn current_position(&self) -> Option<Position> {
        self.registry
            .lock()
            .map(|r| r.last_position)
            .unwrap_or(None)
    }

    /// Register a callback for position updates. Delivery is synchronous and
    /// in subscription order.
    pub fn subscribe(&self, callback: impl Fn(Position) + Send + Sync + 'static) -> CallbackHandle {
        let mut registry = match self.registry.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        let handle = CallbackHandle(registry.next_handle);
        registry.next_handle += 1;
        registry
            .subscribers
            .push((handle, Arc::new(Box::new(callback))));
        handle
    }

    /// Remove a subscription. Returns false if the handle was not registered.
    pub fn unsubscribe(&self, handle: CallbackHandle) -> bool {
        let mut registry = match self.registry.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(h, _)| *h != handle);
        registry.subscribers.len() != before
    }

    /// Replace the last-known position and notify all subscribers.
    ///
    /// Callbacks run outside the registry lock, so a subscriber may
    /// subscribe or unsubscribe reentrantly. A panic in one callback is
    /// caught and traced; later subscribers still receive the update.
    pub fn publish(&self, position: Position) {
        let callbacks: Vec<(CallbackHandle, Arc<PositionCallback>)> = {
            let mut registry = match self.registry.lock() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.last_position = Some(position);
            registry.subscribers.clone()
        };

        for (handle, callback) in callbacks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(position)));
            if result.is_err() {
                tlog!(
                    "[publisher] Subscriber {:?} panicked handling position update",
                    handle
                );
            }
        }
    }
}

impl Default for PositionPublisher {
    fn default() -> Self {
        PositionPublisher::new()
    }
}
