use std::sync::{Arc, Mutex};

use slab::Slab;

use crate::handle::ConnectionHandle;

/// The registry of every open connection handle owned by one channel
/// handler.
///
/// The spec's reference design is an intrusive doubly-linked list so a
/// handle can be unlinked in O(1) without a lookup. A `slab::Slab` gives the
/// same guarantee without raw pointers: insertion hands back a key, the
/// handle remembers its own key, and removal is an O(1) index into the
/// slab -- no scan, no lookup by value.
///
/// The mutex here only ever guards pointer/index bookkeeping; it is never
/// held while a callback runs.
pub(crate) struct LiveSet {
    members: Mutex<Slab<Arc<ConnectionHandle>>>,
}

impl LiveSet {
    pub(crate) fn new() -> Self {
        LiveSet {
            members: Mutex::new(Slab::new()),
        }
    }

    /// Add a handle, returning the key it must present to `remove`.
    pub(crate) fn insert(&self, handle: Arc<ConnectionHandle>) -> usize {
        self.members
            .lock()
            .expect("live-set mutex poisoned")
            .insert(handle)
    }

    /// Remove a handle by the key `insert` returned. No-op if already
    /// removed.
    pub(crate) fn remove(&self, key: usize) {
        let mut members = self.members.lock().expect("live-set mutex poisoned");
        if members.contains(key) {
            members.remove(key);
        }
    }

    /// Snapshot every currently-live handle.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.members
            .lock()
            .expect("live-set mutex poisoned")
            .iter()
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Close every handle still in the live set, then clear it.
    ///
    /// Closing is not performed under the lock: a snapshot is taken first,
    /// so `ConnectionHandle::close` (which itself takes this lock to
    /// unlink) never re-enters a held mutex and `closing` callbacks are
    /// dispatched, not called in-line here.
    pub(crate) fn close_all(&self, reason_factory: impl Fn() -> crate::CloseReason) {
        let snapshot = self.snapshot();
        for handle in snapshot {
            handle.close(reason_factory());
        }
    }
}
