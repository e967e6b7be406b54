//! Per-medication mutual exclusion.
//!
//! Scheduling, cancelling, chaining and user actions for one medication run
//! one at a time; different medications never wait on each other beyond the
//! brief lookup of their slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of one mutex per owner id.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    slots: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, owner_id: i64) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(owner_id).or_default().clone()
    }

    /// Run `f` while holding `owner_id`'s lock.
    ///
    /// Not reentrant: `f` must not call back into `with_owner` for the same
    /// owner.
    pub fn with_owner<R>(&self, owner_id: i64, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(owner_id);
        let _held = slot.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// Number of owners that have a slot.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
