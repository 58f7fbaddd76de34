//! Connect/disconnect list used by every channel that fans out to callbacks.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

/// Handle returned by `connect`, used to disconnect later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of callbacks.
///
/// Emission works on a snapshot, so a callback may connect or disconnect
/// listeners (including itself) without deadlocking.
pub struct Listeners<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<F>)>>,
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self { next_id: AtomicU64::new(1), entries: Mutex::new(Vec::new()) }
    }
}

impl<F: ?Sized> Listeners<F> {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    pub fn connect(&self, callback: Arc<F>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, callback));
        id
    }

    /// Remove a callback. Returns false if it was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Callbacks in connection order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries.lock().iter().map(|(_, callback)| Arc::clone(callback)).collect()
    }

    /// Number of connected callbacks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
