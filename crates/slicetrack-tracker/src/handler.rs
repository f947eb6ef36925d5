//! Subscriber registry and the slice event handler contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use slicetrack_core::inventory::ResourceSlice;

/// Receiver of patched-slice notifications.
///
/// Callbacks run synchronously on the thread that processed the triggering
/// event; implementations must not block indefinitely. The typical handler
/// enqueues the object onto its own work queue and returns.
pub trait SliceEventHandler: Send + Sync {
    /// A patched slice appeared.
    fn on_add(&self, new: &Arc<ResourceSlice>);

    /// A patched slice changed observably.
    fn on_update(&self, old: &Arc<ResourceSlice>, new: &Arc<ResourceSlice>);

    /// A patched slice disappeared.
    fn on_delete(&self, old: &Arc<ResourceSlice>);
}

/// Proof of registration, used to deregister a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub(crate) id: u64,
}

type HandlerList = Arc<Vec<(u64, Arc<dyn SliceEventHandler>)>>;

/// Copy-on-write list of registered handlers.
///
/// Dispatch takes an `Arc` snapshot of the list and iterates without holding
/// any lock, so a handler may register or remove handlers from inside a
/// callback without deadlocking.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    handlers: RwLock<HandlerList>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a handler, returning its registration id.
    pub(crate) fn register(&self, handler: Arc<dyn SliceEventHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = (**handlers).clone();
        next.push((id, handler));
        *handlers = Arc::new(next);
        id
    }

    /// Remove a handler by registration id. Returns whether it was present.
    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !handlers.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = handlers
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *handlers = Arc::new(next);
        true
    }

    /// Snapshot of the current handler list for lock-free dispatch.
    pub(crate) fn snapshot(&self) -> HandlerList {
        Arc::clone(
            &self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}
