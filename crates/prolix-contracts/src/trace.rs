use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contract::{NarrationContract, Violation};

pub const TRACE_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts any non-blank id; surrounding whitespace is dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    IsA,
    MadeOf,
    DerivedFrom,
    EnabledBy,
    Resembles,
    ComputedBy,
    ConstrainedBy,
    HistoricallyEntangledWith,
    ScaledTo,
    EmbeddedIn,
    Feeds,
    MutatesInto,
    StabilizedBy,
    NarratedAs,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsA => "is_a",
            Self::MadeOf => "made_of",
            Self::DerivedFrom => "derived_from",
            Self::EnabledBy => "enabled_by",
            Self::Resembles => "resembles",
            Self::ComputedBy => "computed_by",
            Self::ConstrainedBy => "constrained_by",
            Self::HistoricallyEntangledWith => "historically_entangled_with",
            Self::ScaledTo => "scaled_to",
            Self::EmbeddedIn => "embedded_in",
            Self::Feeds => "feeds",
            Self::MutatesInto => "mutates_into",
            Self::StabilizedBy => "stabilized_by",
            Self::NarratedAs => "narrated_as",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptHop {
    pub node: String,
    pub rel: Relation,
}

impl ConceptHop {
    pub fn new(node: impl Into<String>, rel: Relation) -> Self {
        Self {
            node: node.into(),
            rel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VectorDomain {
    ThermodynamicsEntropy,
    ChemistryTransformation,
    PhysicsParadoxes,
    Cosmology,
    DistributedIntelligence,
    EvolutionarySignaling,
    PlantAgency,
    FeedbackControl,
    EmergenceObserver,
    InfrastructureLogistics,
    ObscureHistoryAgents,
    HeresySects,
    MysteriousEvents,
    CosmologyMyth,
    CultPractices,
}

impl VectorDomain {
    pub const ALL: [VectorDomain; 15] = [
        Self::ThermodynamicsEntropy,
        Self::ChemistryTransformation,
        Self::PhysicsParadoxes,
        Self::Cosmology,
        Self::DistributedIntelligence,
        Self::EvolutionarySignaling,
        Self::PlantAgency,
        Self::FeedbackControl,
        Self::EmergenceObserver,
        Self::InfrastructureLogistics,
        Self::ObscureHistoryAgents,
        Self::HeresySects,
        Self::MysteriousEvents,
        Self::CosmologyMyth,
        Self::CultPractices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThermodynamicsEntropy => "THERMODYNAMICS_ENTROPY",
            Self::ChemistryTransformation => "CHEMISTRY_TRANSFORMATION",
            Self::PhysicsParadoxes => "PHYSICS_PARADOXES",
            Self::Cosmology => "COSMOLOGY",
            Self::DistributedIntelligence => "DISTRIBUTED_INTELLIGENCE",
            Self::EvolutionarySignaling => "EVOLUTIONARY_SIGNALING",
            Self::PlantAgency => "PLANT_AGENCY",
            Self::FeedbackControl => "FEEDBACK_CONTROL",
            Self::EmergenceObserver => "EMERGENCE_OBSERVER",
            Self::InfrastructureLogistics => "INFRASTRUCTURE_LOGISTICS",
            Self::ObscureHistoryAgents => "OBSCURE_HISTORY_AGENTS",
            Self::HeresySects => "HERESY_SECTS",
            Self::MysteriousEvents => "MYSTERIOUS_EVENTS",
            Self::CosmologyMyth => "COSMOLOGY_MYTH",
            Self::CultPractices => "CULT_PRACTICES",
        }
    }

    /// Lowercase, space separated form used inside concept nodes and prompts.
    pub fn phrase(&self) -> String {
        self.as_str().to_ascii_lowercase().replace('_', " ")
    }
}

impl fmt::Display for VectorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndingType {
    Open,
    Resolved,
    Destabilized,
}

impl EndingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Resolved => "RESOLVED",
            Self::Destabilized => "DESTABILIZED",
        }
    }
}

/// Persisted record of one generate/deepen chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub trace_id: TraceId,
    pub created_at: String,
    pub object_label: String,
    pub vector_domain: VectorDomain,
    pub concept_path: Vec<ConceptHop>,
    pub paragraph_text: String,
    pub ending_type: EndingType,
    #[serde(default)]
    pub safety_flag: bool,
    #[serde(default)]
    pub dark_flag: bool,
}

/// Everything a deepening is allowed to change on an existing trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphUpdate {
    pub paragraph_text: String,
    pub concept_path_delta: Vec<ConceptHop>,
    pub ending_type: EndingType,
    pub safety_flag: bool,
    pub dark_flag: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrace {
    pub object_label: String,
    pub vector_domain: VectorDomain,
    pub concept_path: Vec<ConceptHop>,
    pub paragraph_text: String,
    pub ending_type: EndingType,
    pub safety_flag: bool,
    pub dark_flag: bool,
}

impl Trace {
    /// Assigns a fresh id and creation time. Fails if the paragraph breaks the
    /// narration contract.
    pub fn create(fields: NewTrace) -> Result<Self, Vec<Violation>> {
        NarrationContract::default().check(&fields.paragraph_text)?;
        Ok(Self {
            schema_version: TRACE_SCHEMA_VERSION,
            trace_id: TraceId::generate(),
            created_at: now_utc_iso(),
            object_label: fields.object_label,
            vector_domain: fields.vector_domain,
            concept_path: fields.concept_path,
            paragraph_text: fields.paragraph_text,
            ending_type: fields.ending_type,
            safety_flag: fields.safety_flag,
            dark_flag: fields.dark_flag,
        })
    }

    pub fn depth(&self) -> usize {
        self.concept_path.len()
    }

    /// Returns the trace as it looks after `update`, leaving `self` untouched.
    ///
    /// The path only grows, `safety_flag` and `dark_flag` never flip back to
    /// false, and identity fields are carried over unchanged.
    pub fn with_update(&self, update: &ParagraphUpdate) -> Result<Self, Vec<Violation>> {
        NarrationContract::default().check(&update.paragraph_text)?;
        let mut next = self.clone();
        next.concept_path
            .extend(update.concept_path_delta.iter().cloned());
        next.paragraph_text = update.paragraph_text.clone();
        next.ending_type = update.ending_type;
        next.safety_flag = self.safety_flag || update.safety_flag;
        next.dark_flag = self.dark_flag || update.dark_flag;
        Ok(next)
    }
}

fn default_schema_version() -> u64 {
    TRACE_SCHEMA_VERSION
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::*;

    fn paragraph(words: usize) -> String {
        vec!["drift"; words].join(" ")
    }

    fn sample() -> NewTrace {
        NewTrace {
            object_label: "wire".to_string(),
            vector_domain: VectorDomain::FeedbackControl,
            concept_path: vec![
                ConceptHop::new("wire", Relation::IsA),
                ConceptHop::new("copper substrate", Relation::MadeOf),
            ],
            paragraph_text: paragraph(260),
            ending_type: EndingType::Open,
            safety_flag: false,
            dark_flag: false,
        }
    }

    #[test]
    fn create_assigns_id_and_timestamp() -> anyhow::Result<()> {
        let trace = Trace::create(sample()).map_err(|v| anyhow::anyhow!("{v:?}"))?;
        assert!(!trace.trace_id.as_str().is_empty());
        DateTime::parse_from_rfc3339(&trace.created_at)?;
        assert_eq!(trace.depth(), 2);
        Ok(())
    }

    #[test]
    fn create_rejects_paragraph_outside_contract() {
        let mut fields = sample();
        fields.paragraph_text = paragraph(12);
        assert!(Trace::create(fields).is_err());
    }

    #[test]
    fn update_appends_path_and_keeps_identity() -> anyhow::Result<()> {
        let trace = Trace::create(sample()).map_err(|v| anyhow::anyhow!("{v:?}"))?;
        let update = ParagraphUpdate {
            paragraph_text: paragraph(300),
            concept_path_delta: vec![ConceptHop::new("feedback residue", Relation::MutatesInto)],
            ending_type: EndingType::Destabilized,
            safety_flag: false,
            dark_flag: true,
        };
        let next = trace
            .with_update(&update)
            .map_err(|v| anyhow::anyhow!("{v:?}"))?;
        assert_eq!(next.trace_id, trace.trace_id);
        assert_eq!(next.created_at, trace.created_at);
        assert_eq!(next.object_label, trace.object_label);
        assert_eq!(next.vector_domain, trace.vector_domain);
        assert_eq!(next.depth(), 3);
        assert_eq!(&next.concept_path[..2], &trace.concept_path[..]);
        assert_eq!(next.ending_type, EndingType::Destabilized);
        assert!(next.dark_flag);
        Ok(())
    }

    #[test]
    fn flags_are_sticky_across_updates() -> anyhow::Result<()> {
        let mut fields = sample();
        fields.safety_flag = true;
        fields.dark_flag = true;
        let trace = Trace::create(fields).map_err(|v| anyhow::anyhow!("{v:?}"))?;
        let update = ParagraphUpdate {
            paragraph_text: paragraph(280),
            concept_path_delta: vec![ConceptHop::new("naming", Relation::Feeds)],
            ending_type: EndingType::Resolved,
            safety_flag: false,
            dark_flag: false,
        };
        let next = trace
            .with_update(&update)
            .map_err(|v| anyhow::anyhow!("{v:?}"))?;
        assert!(next.safety_flag);
        assert!(next.dark_flag);
        Ok(())
    }

    #[test]
    fn serialized_shape_matches_persisted_record() -> anyhow::Result<()> {
        let trace = Trace::create(sample()).map_err(|v| anyhow::anyhow!("{v:?}"))?;
        let value = serde_json::to_value(&trace)?;
        assert_eq!(value["vector_domain"], json!("FEEDBACK_CONTROL"));
        assert_eq!(value["ending_type"], json!("OPEN"));
        assert_eq!(value["concept_path"][1]["rel"], json!("made_of"));
        assert_eq!(value["trace_id"], Value::String(trace.trace_id.to_string()));

        let parsed: Trace = serde_json::from_value(value)?;
        assert_eq!(parsed, trace);
        Ok(())
    }

    #[test]
    fn trace_id_parse_rejects_blank() {
        assert!(TraceId::parse("   ").is_none());
        assert_eq!(
            TraceId::parse(" abc ").map(|id| id.to_string()),
            Some("abc".to_string())
        );
    }

    #[test]
    fn domain_phrase_is_lowercase_words() {
        assert_eq!(VectorDomain::PlantAgency.phrase(), "plant agency");
        assert_eq!(VectorDomain::ALL.len(), 15);
    }
}
