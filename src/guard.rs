//! Single-flight guard: at most one in-flight job per resource key.
//!
//! Checked before any generation submission. If the key is busy the caller
//! rejects the action outright - there is no queue. This is the sole defense
//! against duplicate, billable AI calls from double-clicks or multiple
//! observers of the same resource.
//!
//! Release happens in `FlightPermit::drop`, so every exit path - success,
//! remote failure, missing result, client timeout, submission error, panic -
//! frees the key.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::task::ResourceKey;

/// Process-wide busy set keyed by resource.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<Mutex<HashSet<ResourceKey>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit a job for `key`. Returns `None` while another job holds
    /// the key.
    pub fn try_acquire(&self, key: ResourceKey) -> Option<FlightPermit> {
        let mut busy = self.busy.lock().expect("single-flight lock poisoned");
        if !busy.insert(key.clone()) {
            return None;
        }
        Some(FlightPermit {
            key,
            busy: Arc::clone(&self.busy),
        })
    }

    /// Whether `key` currently has a job in flight.
    pub fn is_busy(&self, key: &ResourceKey) -> bool {
        self.busy
            .lock()
            .expect("single-flight lock poisoned")
            .contains(key)
    }
}

/// Admission for one job. Dropping the permit releases the key.
#[derive(Debug)]
pub struct FlightPermit {
    key: ResourceKey,
    busy: Arc<Mutex<HashSet<ResourceKey>>>,
}

impl FlightPermit {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.busy.lock() {
            busy.remove(&self.key);
        }
    }
}
