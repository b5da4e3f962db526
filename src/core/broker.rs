use crate::core::error::LedgerError;
use parking_lot::{ReentrantMutex, RwLock};
use std::sync::Arc;
use std::time::Instant;

/// The Broker is the "Thin Waist" for ledger state access.
///
/// One reentrant mutex serializes every store read/write and every ledger
/// operation, so a locked operation may call another locked operation on
/// the same thread. There is no per-record locking.
///
/// The broker also owns the active roster. It is only ever replaced as a
/// whole, and only while the mutex is held; readers get a snapshot.
pub struct Broker {
    lock: ReentrantMutex<()>,
    roster: RwLock<Arc<Vec<String>>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Broker {
    pub fn new(roster: Vec<String>) -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            roster: RwLock::new(Arc::new(roster)),
        }
    }

    /// Execute a closure while holding the ledger lock.
    pub fn with_lock<F, R>(&self, op_name: &str, f: F) -> Result<R, LedgerError>
    where
        F: FnOnce() -> Result<R, LedgerError>,
    {
        let waited = Instant::now();
        let _guard = self.lock.lock();
        let held = Instant::now();
        tracing::trace!(
            op = op_name,
            wait_us = held.duration_since(waited).as_micros() as u64,
            "ledger lock acquired"
        );

        let result = f();

        match &result {
            Ok(_) => tracing::debug!(
                op = op_name,
                held_us = held.elapsed().as_micros() as u64,
                "ledger op done"
            ),
            Err(e) => tracing::warn!(op = op_name, error = %e, "ledger op failed"),
        }
        result
    }

    /// Snapshot of the active roster.
    pub fn roster(&self) -> Arc<Vec<String>> {
        self.roster.read().clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.roster.read().iter().any(|n| n == name)
    }

    /// Swap in a new roster. Must be called under [`Broker::with_lock`].
    pub fn replace_roster(&self, names: Vec<String>) {
        debug_assert!(self.lock.is_locked());
        *self.roster.write() = Arc::new(names);
    }
}
