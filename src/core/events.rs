//! Change notifications published after ledger operations.
//!
//! Subscribers each get their own channel and drain it at their own pace;
//! a dropped receiver is pruned on the next publish.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    DrinkerUpdated,
    DrinkerDeleted,
    AdminCashUpdated,
    RosterReplaced,
    CatalogReloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    /// Unix seconds with `Z` suffix.
    pub ts: String,
    pub kind: LedgerEventKind,
    /// Affected drinker, when there is one.
    pub identity: Option<String>,
}

impl LedgerEvent {
    pub fn new(kind: LedgerEventKind, identity: Option<&str>) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            event_id: Ulid::new().to_string(),
            ts: format!("{}Z", secs),
            kind,
            identity: identity.map(str::to_string),
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<flume::Sender<LedgerEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> flume::Receiver<LedgerEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: LedgerEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(kind = ?event.kind, identity = ?event.identity, subscribers = subs.len(), "event published");
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
