//! Progress listener registry for remote jobs.
//!
//! A job owns a [`ProgressListeners`] table. Subscribing returns a
//! [`Subscription`]; cancelling it (or dropping it) removes the listener.
//! Listeners run while the table lock is held, so once
//! [`Subscription::cancel`] returns the listener can no longer be called.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::RawProgress;

/// Callback invoked with each progress event of a job.
///
/// `None` means the service sent an event without usable progress numbers.
pub type ProgressListener = Arc<dyn Fn(Option<RawProgress>) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: Vec<(u64, ProgressListener)>,
}

/// Shared table of progress listeners for one job.
#[derive(Clone, Default)]
pub struct ProgressListeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl ProgressListeners {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe(&self, listener: ProgressListener) -> Subscription {
        let mut table = lock(&self.table);
        let id = table.next_id;
        table.next_id += 1;
        table.listeners.push((id, listener));

        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Delivers a progress event to every current listener.
    pub fn emit(&self, progress: Option<RawProgress>) {
        let table = lock(&self.table);
        for (_, listener) in &table.listeners {
            listener(progress);
        }
    }

    /// Returns the number of attached listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.table).listeners.len()
    }

    /// Returns `true` if no listener is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to one registered listener.
///
/// The listener is detached by [`Subscription::cancel`] or on drop,
/// whichever comes first.
#[must_use = "dropping a Subscription detaches its listener immediately"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    /// Detaches the listener.
    pub fn cancel(self) {
        drop(self);
    }

    fn detach(&self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock(table: &Mutex<ListenerTable>) -> MutexGuard<'_, ListenerTable> {
    // A panicking listener leaves the table itself consistent.
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
