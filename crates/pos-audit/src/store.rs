//! Storage backends for attack events.
//!
//! [`AttackStore`] abstracts over where events live. Aggregation happens in
//! [`crate::AttackMonitor`] on top of [`AttackStore::events_since`], so every
//! backend shares the same statistics semantics.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::events::AttackEvent;

/// Trait for attack event storage backends.
pub trait AttackStore: Send + Sync + fmt::Debug {
    /// Persists an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot accept the event.
    fn append(&self, event: AttackEvent) -> Result<()>;

    /// Returns every event created at or after `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AttackEvent>>;

    /// Keeps only events for which `keep` returns true.
    ///
    /// Returns the number of events removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be rewritten.
    fn retain(&self, keep: &(dyn Fn(&AttackEvent) -> bool + Sync)) -> Result<usize>;

    /// Returns the number of stored events.
    fn len(&self) -> usize;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory attack store.
#[derive(Debug, Default)]
pub struct MemoryAttackStore {
    events: RwLock<Vec<AttackEvent>>,
}

impl MemoryAttackStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttackStore for MemoryAttackStore {
    fn append(&self, event: AttackEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AttackEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.created_at() >= since)
            .cloned()
            .collect())
    }

    fn retain(&self, keep: &(dyn Fn(&AttackEvent) -> bool + Sync)) -> Result<usize> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| keep(e));
        Ok(before - events.len())
    }

    fn len(&self) -> usize {
        self.events.read().len()
    }
}
