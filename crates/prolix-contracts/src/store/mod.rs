//! Trace persistence.
//!
//! Stores own the persisted state; every write goes through
//! [`Trace::with_update`] or [`Trace::create`] so the narration contract and the
//! append-only path rule are checked at the storage boundary too.

mod json_dir;
mod leases;
mod memory;

pub use json_dir::JsonDirTraceStore;
pub use leases::{TraceLease, TraceLeases};
pub use memory::MemoryTraceStore;

use crate::contract::NarrationContract;
use crate::error::StoreError;
use crate::trace::{ParagraphUpdate, Trace, TraceId};

pub trait TraceStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] when the id is taken.
    fn create(&self, trace: &Trace) -> Result<(), StoreError>;

    fn get(&self, trace_id: &TraceId) -> Result<Trace, StoreError>;

    /// Applies all fields of `update` or none of them.
    fn update_paragraph(
        &self,
        trace_id: &TraceId,
        update: &ParagraphUpdate,
    ) -> Result<Trace, StoreError>;
}

fn ensure_valid(trace: &Trace) -> Result<(), StoreError> {
    NarrationContract::default()
        .check(&trace.paragraph_text)
        .map_err(StoreError::InvalidParagraph)
}

fn apply_update(current: &Trace, update: &ParagraphUpdate) -> Result<Trace, StoreError> {
    current
        .with_update(update)
        .map_err(StoreError::InvalidParagraph)
}
