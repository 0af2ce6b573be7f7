//! Handler registries for inbound events, requests, and raw reports.
//!
//! Handlers run on the session's reader task, in registration order, outside
//! the registry lock, so a handler may unsubscribe itself.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::infrastructure::channel::InboundReport;

/// Called with `(report_id, payload)` for every inbound event.
pub type EventHandler = Arc<dyn Fn(u8, &[u8]) + Send + Sync>;

/// Called with `(report_id, payload)` for every inbound request.  Returning
/// `Some(reply)` sends `reply` back as the response under the request's id.
pub type RequestHandler = Arc<dyn Fn(u8, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Called with every inbound report before reassembly.
pub type ReportHandler = Arc<dyn Fn(&InboundReport) + Send + Sync>;

trait Detach: Send + Sync {
    fn detach(&self, token: u64);
}

/// Capability to remove one registered handler.
///
/// Dropping the handle leaves the handler registered.
pub struct Subscription {
    registry: Weak<dyn Detach>,
    token: u64,
}

impl Subscription {
    /// Removes the handler.  A no-op if the session is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.token);
        }
    }
}

struct Entries<H> {
    next_token: u64,
    handlers: Vec<(u64, H)>,
}

/// An ordered list of handlers of one kind.
pub struct Registry<H> {
    entries: Mutex<Entries<H>>,
}

impl<H: Clone + Send + Sync + 'static> Registry<H> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Entries {
                next_token: 0,
                handlers: Vec::new(),
            }),
        })
    }

    /// Appends `handler` and returns its unsubscribe capability.
    pub fn add(self: &Arc<Self>, handler: H) -> Subscription {
        let mut entries = self.lock();
        let token = entries.next_token;
        entries.next_token += 1;
        entries.handlers.push((token, handler));
        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription {
            registry: weak,
            token,
        }
    }

    /// Returns the current handlers in registration order.
    pub fn snapshot(&self) -> Vec<H> {
        self.lock()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries<H>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: Clone + Send + Sync + 'static> Detach for Registry<H> {
    fn detach(&self, token: u64) {
        self.lock().handlers.retain(|(t, _)| *t != token);
    }
}
