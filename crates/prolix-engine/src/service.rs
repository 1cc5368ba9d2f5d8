use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prolix_contracts::contract::{style_notes, Violation};
use prolix_contracts::error::NarrationError;
use prolix_contracts::events::EventWriter;
use prolix_contracts::store::{TraceLeases, TraceStore};
use prolix_contracts::trace::{
    ConceptHop, EndingType, NewTrace, ParagraphUpdate, Trace, TraceId, VectorDomain,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::drift::{
    classify, next_safety_hop, safety_path, DriftEngine, SAFE_FALLBACK_PARAGRAPH,
};
use crate::narration::{DraftFailure, Narrator};
use crate::providers::{PromptContext, PromptPurpose, ProviderError, Providers, Tap};
use crate::retrieval::{RetrievalService, Snippet, DEFAULT_EVIDENCE_LIMIT};

/// Set when the caller goes away; checked before anything is persisted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateResponse {
    pub trace_id: TraceId,
    pub paragraph_text: String,
}

struct Narrated {
    paragraph_text: String,
    ending_type: EndingType,
    dark_flag: bool,
    safety_flag: bool,
    attempts: u32,
    evidence_ids: Vec<String>,
}

impl Narrated {
    fn safety_fallback(prior_dark: bool) -> Self {
        Self {
            paragraph_text: SAFE_FALLBACK_PARAGRAPH.to_string(),
            ending_type: EndingType::Resolved,
            dark_flag: prior_dark,
            safety_flag: true,
            attempts: 0,
            evidence_ids: Vec::new(),
        }
    }
}

/// Generate, deepen and read back traces.
pub struct NarrationService {
    drift: DriftEngine,
    narrator: Narrator,
    retrieval: RetrievalService,
    store: Arc<dyn TraceStore>,
    leases: TraceLeases,
    journal: Option<EventWriter>,
}

impl NarrationService {
    pub fn new(providers: Providers, store: Arc<dyn TraceStore>) -> Self {
        Self {
            drift: DriftEngine::new(providers),
            narrator: Narrator::default(),
            retrieval: RetrievalService::empty(),
            store,
            leases: TraceLeases::new(),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: EventWriter) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalService) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_regeneration_ceiling(mut self, ceiling: u32) -> Self {
        self.narrator = Narrator::new(ceiling);
        self
    }

    pub fn providers(&self) -> &Providers {
        self.drift.providers()
    }

    pub fn leases(&self) -> &TraceLeases {
        &self.leases
    }

    pub fn generate(
        &self,
        image: &[u8],
        tap_x: f64,
        tap_y: f64,
        cancel: &CancellationFlag,
    ) -> Result<GenerateResponse, NarrationError> {
        if image.is_empty() {
            return Err(NarrationError::InvalidInput("image is required".to_string()));
        }
        for (axis, value) in [("tap_x", tap_x), ("tap_y", tap_y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(NarrationError::InvalidInput(format!(
                    "{axis} must be a number in [0, 1], got {value}"
                )));
            }
        }

        let tap = Tap { x: tap_x, y: tap_y };
        let mut plan = self
            .drift
            .seed(image, tap)
            .map_err(|err| self.provider_failure(self.providers().vision.name(), err))?;

        let narrated = if plan.safety {
            Narrated::safety_fallback(false)
        } else {
            let context = PromptContext {
                purpose: PromptPurpose::Paragraph,
                object_label: plan.object_label.clone(),
                domain: plan.domain,
                descriptors: plan.descriptors.clone(),
                path: plan.concept_path.clone(),
                prior_paragraph: None,
                evidence: self.evidence(&plan.object_label, plan.domain),
                attempt: 0,
                previous_violations: Vec::new(),
            };
            match self.narrate(context, None, false, plan.concept_path.len())? {
                Some(narrated) => narrated,
                None => {
                    plan.domain = VectorDomain::FeedbackControl;
                    plan.concept_path = safety_path(&plan.object_label);
                    Narrated::safety_fallback(false)
                }
            }
        };
        if narrated.safety_flag {
            self.journal(
                "safety_redirect",
                None,
                json!({"stage": "generate", "object_label": plan.object_label}),
            );
            tracing::warn!(object_label = %plan.object_label, "generate redirected to safety fallback");
        }

        let trace = Trace::create(NewTrace {
            object_label: plan.object_label,
            vector_domain: plan.domain,
            concept_path: plan.concept_path,
            paragraph_text: narrated.paragraph_text,
            ending_type: narrated.ending_type,
            safety_flag: narrated.safety_flag,
            dark_flag: narrated.dark_flag,
        })
        .map_err(|violations| NarrationError::ContractViolation {
            attempts: narrated.attempts,
            violations,
        })?;

        self.ensure_not_cancelled(cancel, None)?;
        self.store.create(&trace)?;

        self.journal(
            "trace_created",
            Some(&trace.trace_id),
            json!({
                "object_label": trace.object_label,
                "vector_domain": trace.vector_domain,
                "concept_path": trace.concept_path,
                "ending_type": trace.ending_type,
                "safety_flag": trace.safety_flag,
                "dark_flag": trace.dark_flag,
                "draft_attempts": narrated.attempts,
                "evidence_ids": narrated.evidence_ids,
                "style_notes": style_notes(&trace.paragraph_text),
            }),
        );
        tracing::info!(
            trace_id = %trace.trace_id,
            object_label = %trace.object_label,
            domain = %trace.vector_domain,
            depth = trace.depth(),
            ending = trace.ending_type.as_str(),
            "trace created"
        );

        Ok(GenerateResponse {
            trace_id: trace.trace_id,
            paragraph_text: trace.paragraph_text,
        })
    }

    /// Holds the trace lease for the whole read-modify-write; a second
    /// concurrent deepen on the same trace fails with `Conflict`.
    pub fn deepen(
        &self,
        trace_id: &TraceId,
        cancel: &CancellationFlag,
    ) -> Result<GenerateResponse, NarrationError> {
        let _lease = self
            .leases
            .try_acquire(trace_id)
            .ok_or_else(|| NarrationError::Conflict(trace_id.clone()))?;
        let current = self.store.get(trace_id)?;

        let extension = self
            .drift
            .extend(&current)
            .map_err(|err| self.provider_failure(self.providers().text.name(), err))?;
        let mut hop = extension.hop;

        let narrated = if current.safety_flag || extension.safety {
            Narrated::safety_fallback(current.dark_flag)
        } else {
            let mut path = current.concept_path.clone();
            path.push(hop.clone());
            let depth = path.len();
            let context = PromptContext {
                purpose: PromptPurpose::Paragraph,
                object_label: current.object_label.clone(),
                domain: current.vector_domain,
                descriptors: Vec::new(),
                path,
                prior_paragraph: Some(current.paragraph_text.clone()),
                evidence: self.evidence(&current.object_label, current.vector_domain),
                attempt: 0,
                previous_violations: Vec::new(),
            };
            match self.narrate(context, Some(trace_id), current.dark_flag, depth)? {
                Some(narrated) => narrated,
                None => {
                    hop = next_safety_hop(&current.concept_path);
                    Narrated::safety_fallback(current.dark_flag)
                }
            }
        };
        if narrated.safety_flag && !current.safety_flag {
            self.journal(
                "safety_redirect",
                Some(trace_id),
                json!({"stage": "deepen"}),
            );
            tracing::warn!(%trace_id, "deepen redirected to safety fallback");
        }

        let update = ParagraphUpdate {
            paragraph_text: narrated.paragraph_text,
            concept_path_delta: vec![hop],
            ending_type: narrated.ending_type,
            safety_flag: narrated.safety_flag,
            dark_flag: narrated.dark_flag,
        };

        self.ensure_not_cancelled(cancel, Some(trace_id))?;
        let updated = self.store.update_paragraph(trace_id, &update)?;

        let added: Vec<&ConceptHop> = update.concept_path_delta.iter().collect();
        self.journal(
            "trace_deepened",
            Some(trace_id),
            json!({
                "concept_path_delta": added,
                "depth": updated.depth(),
                "ending_type": updated.ending_type,
                "safety_flag": updated.safety_flag,
                "dark_flag": updated.dark_flag,
                "draft_attempts": narrated.attempts,
                "evidence_ids": narrated.evidence_ids,
                "style_notes": style_notes(&updated.paragraph_text),
            }),
        );
        tracing::info!(
            %trace_id,
            depth = updated.depth(),
            ending = updated.ending_type.as_str(),
            "trace deepened"
        );

        Ok(GenerateResponse {
            trace_id: updated.trace_id,
            paragraph_text: updated.paragraph_text,
        })
    }

    pub fn trace(&self, trace_id: &TraceId) -> Result<Trace, NarrationError> {
        Ok(self.store.get(trace_id)?)
    }

    /// `Ok(None)` means the text provider declined and the caller should take
    /// the safety branch.
    fn narrate(
        &self,
        context: PromptContext,
        trace_id: Option<&TraceId>,
        prior_dark: bool,
        depth: usize,
    ) -> Result<Option<Narrated>, NarrationError> {
        let object_label = context.object_label.clone();
        let domain = context.domain;
        let evidence_ids: Vec<String> = context
            .evidence
            .iter()
            .map(|snippet| snippet.source_id.clone())
            .collect();
        let text = Arc::clone(&self.providers().text);

        let drafted = self
            .narrator
            .draft(text.as_ref(), context, |attempt, violations| {
                self.journal(
                    "draft_rejected",
                    trace_id,
                    json!({
                        "attempt": attempt,
                        "violations": violations_payload(violations),
                    }),
                );
            });
        let drafted = match drafted {
            Ok(drafted) => drafted,
            Err(DraftFailure::Provider(ProviderError::ContentDisallowed(reason))) => {
                tracing::warn!(%reason, "text provider declined the paragraph");
                return Ok(None);
            }
            Err(DraftFailure::Provider(err)) => {
                return Err(self.provider_failure(text.name(), err));
            }
            Err(DraftFailure::Contract {
                attempts,
                violations,
            }) => {
                return Err(NarrationError::ContractViolation {
                    attempts,
                    violations,
                })
            }
        };

        let classification = classify(prior_dark, domain, depth, &drafted.text, &object_label);
        Ok(Some(Narrated {
            paragraph_text: drafted.text,
            ending_type: classification.ending_type,
            dark_flag: classification.dark_flag,
            safety_flag: false,
            attempts: drafted.attempts,
            evidence_ids,
        }))
    }

    fn evidence(&self, object_label: &str, domain: VectorDomain) -> Vec<Snippet> {
        self.retrieval
            .retrieve(object_label, domain, DEFAULT_EVIDENCE_LIMIT)
    }

    fn ensure_not_cancelled(
        &self,
        cancel: &CancellationFlag,
        trace_id: Option<&TraceId>,
    ) -> Result<(), NarrationError> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        self.journal("request_cancelled", trace_id, json!({}));
        tracing::info!(trace_id = ?trace_id.map(TraceId::as_str), "request cancelled before persisting");
        Err(NarrationError::Cancelled)
    }

    fn provider_failure(&self, provider: &str, err: ProviderError) -> NarrationError {
        NarrationError::ProviderUnavailable {
            provider: provider.to_string(),
            attempts: err.attempts(),
            reason: err.to_string(),
        }
    }

    /// Journal failures are logged, never surfaced to the caller.
    fn journal(&self, event_type: &str, trace_id: Option<&TraceId>, payload: Value) {
        let Some(writer) = &self.journal else {
            return;
        };
        if let Err(err) = writer.emit(event_type, trace_id, payload) {
            tracing::warn!(event_type, error = %err, "failed to append journal event");
        }
    }
}

fn violations_payload(violations: &[Violation]) -> Value {
    Value::Array(
        violations
            .iter()
            .map(|violation| json!({"code": violation.code(), "message": violation.to_string()}))
            .collect(),
    )
}
