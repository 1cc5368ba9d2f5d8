use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::trace::TraceId;

/// Per-trace exclusion for read-modify-write sequences.
///
/// Acquisition never waits: a second caller for the same id gets `None`.
#[derive(Debug, Clone, Default)]
pub struct TraceLeases {
    held: Arc<Mutex<HashSet<TraceId>>>,
}

impl TraceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, trace_id: &TraceId) -> Option<TraceLease> {
        let mut held = self.held.lock().ok()?;
        if !held.insert(trace_id.clone()) {
            return None;
        }
        Some(TraceLease {
            held: Arc::clone(&self.held),
            trace_id: trace_id.clone(),
        })
    }

    pub fn is_held(&self, trace_id: &TraceId) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(trace_id))
            .unwrap_or(false)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct TraceLease {
    held: Arc<Mutex<HashSet<TraceId>>>,
    trace_id: TraceId,
}

impl Drop for TraceLease {
    fn drop(&mut self) {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.trace_id);
    }
}
