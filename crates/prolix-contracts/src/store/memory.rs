use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::trace::{ParagraphUpdate, Trace, TraceId};

use super::{apply_update, ensure_valid, TraceStore};

#[derive(Debug, Default)]
pub struct MemoryTraceStore {
    traces: Mutex<HashMap<TraceId, Trace>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.traces.lock().map(|traces| traces.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceStore for MemoryTraceStore {
    fn create(&self, trace: &Trace) -> Result<(), StoreError> {
        ensure_valid(trace)?;
        let mut traces = self.traces.lock().map_err(|_| StoreError::Poisoned)?;
        if traces.contains_key(&trace.trace_id) {
            return Err(StoreError::AlreadyExists(trace.trace_id.clone()));
        }
        traces.insert(trace.trace_id.clone(), trace.clone());
        Ok(())
    }

    fn get(&self, trace_id: &TraceId) -> Result<Trace, StoreError> {
        let traces = self.traces.lock().map_err(|_| StoreError::Poisoned)?;
        traces
            .get(trace_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(trace_id.clone()))
    }

    fn update_paragraph(
        &self,
        trace_id: &TraceId,
        update: &ParagraphUpdate,
    ) -> Result<Trace, StoreError> {
        let mut traces = self.traces.lock().map_err(|_| StoreError::Poisoned)?;
        let current = traces
            .get(trace_id)
            .ok_or_else(|| StoreError::NotFound(trace_id.clone()))?;
        let next = apply_update(current, update)?;
        traces.insert(trace_id.clone(), next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ConceptHop, EndingType, NewTrace, Relation, VectorDomain};

    fn paragraph(words: usize) -> String {
        vec!["patina"; words].join(" ")
    }

    fn trace() -> Trace {
        Trace::create(NewTrace {
            object_label: "bottle".to_string(),
            vector_domain: VectorDomain::ChemistryTransformation,
            concept_path: vec![ConceptHop::new("bottle", Relation::IsA)],
            paragraph_text: paragraph(260),
            ending_type: EndingType::Open,
            safety_flag: false,
            dark_flag: false,
        })
        .unwrap_or_else(|violations| panic!("fixture invalid: {violations:?}"))
    }

    #[test]
    fn create_then_get_roundtrips() -> anyhow::Result<()> {
        let store = MemoryTraceStore::new();
        let trace = trace();
        store.create(&trace)?;
        assert_eq!(store.get(&trace.trace_id)?, trace);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn create_rejects_duplicate_id() -> anyhow::Result<()> {
        let store = MemoryTraceStore::new();
        let trace = trace();
        store.create(&trace)?;
        assert!(matches!(
            store.create(&trace),
            Err(StoreError::AlreadyExists(_))
        ));
        Ok(())
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryTraceStore::new();
        assert!(matches!(
            store.get(&TraceId::generate()),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn create_rejects_invalid_paragraph() {
        let store = MemoryTraceStore::new();
        let mut invalid = trace();
        invalid.paragraph_text = "too short".to_string();
        assert!(matches!(
            store.create(&invalid),
            Err(StoreError::InvalidParagraph(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn failed_update_leaves_trace_untouched() -> anyhow::Result<()> {
        let store = MemoryTraceStore::new();
        let trace = trace();
        store.create(&trace)?;

        let update = ParagraphUpdate {
            paragraph_text: format!("{}\n\n{}", paragraph(150), paragraph(150)),
            concept_path_delta: vec![ConceptHop::new("glass melt", Relation::MadeOf)],
            ending_type: EndingType::Resolved,
            safety_flag: true,
            dark_flag: true,
        };
        assert!(store.update_paragraph(&trace.trace_id, &update).is_err());
        assert_eq!(store.get(&trace.trace_id)?, trace);
        Ok(())
    }

    #[test]
    fn update_appends_and_overwrites_paragraph() -> anyhow::Result<()> {
        let store = MemoryTraceStore::new();
        let trace = trace();
        store.create(&trace)?;

        let update = ParagraphUpdate {
            paragraph_text: paragraph(300),
            concept_path_delta: vec![ConceptHop::new("glass melt", Relation::MadeOf)],
            ending_type: EndingType::Resolved,
            safety_flag: false,
            dark_flag: false,
        };
        let updated = store.update_paragraph(&trace.trace_id, &update)?;
        assert_eq!(updated.depth(), 2);
        assert_eq!(updated.paragraph_text, paragraph(300));
        assert_eq!(store.get(&trace.trace_id)?, updated);

        assert!(matches!(
            store.update_paragraph(&TraceId::generate(), &update),
            Err(StoreError::NotFound(_))
        ));
        Ok(())
    }
}
