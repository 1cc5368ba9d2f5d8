//! Concept-path planning and ending classification.
//!
//! `seed` opens a trace from the tapped region, `extend` adds one hop to an
//! existing trace, and `classify` decides the ending and dark flag once a
//! paragraph exists. Paragraph drafting itself lives in [`crate::narration`].

use prolix_contracts::trace::{ConceptHop, EndingType, Relation, Trace, VectorDomain};
use sha2::{Digest, Sha256};

use crate::providers::{
    PromptContext, PromptPurpose, ProviderError, Providers, RegionRequest, Tap,
};

pub const MAX_CONCEPT_WORDS: usize = 8;
pub const MAX_SEED_CONCEPTS: usize = 3;
/// Paths at least this long end `DESTABILIZED`.
pub const DESTABILIZED_DEPTH: usize = 12;
/// Paths at least this long are dark regardless of domain.
pub const DARK_DEPTH: usize = 14;

pub const UNIDENTIFIED_LABEL: &str = "unidentified object";
/// Served instead of a generated paragraph whenever the safety branch fires.
pub const SAFE_FALLBACK_PARAGRAPH: &str = "Some details in this scene are not the kind of thing a paragraph should travel through, so \
the thought stays with the act of looking rather than the thing looked at. Every camera \
carries a small machine for pattern recognition, a routine that sorts edges and gradients \
into likely categories, and that routine is constrained by classification thresholds \
chosen by people who will never see this particular frame. A threshold is a strange object \
in its own right: a number, argued over in meetings, that decides whether a smear of \
pixels becomes a face, a plate, a stranger, or nothing at all. Behind those numbers sits a \
long history of institutional anonymity, of census clerks and archive indexers who learned \
that the safest record is sometimes the one that leaves a name out. The ethics of naming \
are older than photography; scribes chiselled names off monuments, registrars sealed \
adoption papers, and librarians still redact letters before they reach the reading room. \
At the scale of a single millimeter of sensor, the light that fell here is only a count of \
photons sorted into wells; at the scale of decades, it joins an enormous archive of \
glances that nobody asked to be part of. Somewhere between those two scales a decision has \
to be made about what deserves to be carried forward, and the quiet answer here is to \
carry the scene itself: the light, the surfaces, the ordinary weather of the room, and the \
fact that someone paused long enough to tap. That pause is worth keeping. It is the \
smallest unit of attention, a signal that returns to the scene without taking anything \
from it, and so the image stays whole, unsorted, and exactly as it was found.";

const GENERIC_SEEDS: [&str; 3] = ["surface residue", "manufactured geometry", "ambient wear"];

const DOMAIN_WEIGHTS: [(VectorDomain, f64); 15] = [
    (VectorDomain::ThermodynamicsEntropy, 1.0),
    (VectorDomain::ChemistryTransformation, 1.0),
    (VectorDomain::PhysicsParadoxes, 0.9),
    (VectorDomain::Cosmology, 0.5),
    (VectorDomain::DistributedIntelligence, 1.0),
    (VectorDomain::EvolutionarySignaling, 1.0),
    (VectorDomain::PlantAgency, 0.8),
    (VectorDomain::FeedbackControl, 1.0),
    (VectorDomain::EmergenceObserver, 0.8),
    (VectorDomain::InfrastructureLogistics, 1.0),
    (VectorDomain::ObscureHistoryAgents, 0.8),
    (VectorDomain::HeresySects, 0.7),
    (VectorDomain::MysteriousEvents, 0.35),
    (VectorDomain::CosmologyMyth, 0.7),
    (VectorDomain::CultPractices, 0.6),
];

const DEEPEN_RELATIONS: [Relation; 9] = [
    Relation::MutatesInto,
    Relation::ComputedBy,
    Relation::ConstrainedBy,
    Relation::HistoricallyEntangledWith,
    Relation::ScaledTo,
    Relation::StabilizedBy,
    Relation::NarratedAs,
    Relation::Feeds,
    Relation::EmbeddedIn,
];

const FALLBACK_SUFFIXES: [&str; 6] = [
    "residue",
    "feedback loop",
    "long memory",
    "hidden ledger",
    "phase boundary",
    "quiet witness",
];

const SAFETY_DEEPEN_HOPS: [(&str, Relation); 5] = [
    ("consent protocols", Relation::StabilizedBy),
    ("redaction practice", Relation::ConstrainedBy),
    ("archival silence", Relation::NarratedAs),
    ("aggregate statistics", Relation::ComputedBy),
    ("scene-level return signal", Relation::Feeds),
];

pub fn is_dark_domain(domain: VectorDomain) -> bool {
    domain == VectorDomain::MysteriousEvents
}

pub fn attractor(domain: VectorDomain) -> Option<&'static str> {
    match domain {
        VectorDomain::HeresySects => Some("Bogomils"),
        VectorDomain::PhysicsParadoxes => Some("quantum suicide"),
        VectorDomain::Cosmology => Some("holographic principle"),
        VectorDomain::PlantAgency => Some("corn is growing us"),
        VectorDomain::CosmologyMyth => Some("Egyptian cosmology motifs"),
        VectorDomain::DistributedIntelligence => Some("distributed brains of octopi"),
        VectorDomain::ObscureHistoryAgents => Some("Napoleonic courier networks"),
        VectorDomain::MysteriousEvents => Some("Pauli Effect"),
        VectorDomain::CultPractices => Some("pre-modern bear cults"),
        _ => None,
    }
}

/// Weighted pick keyed on the request, so identical requests share a domain.
pub fn choose_domain(image: &[u8], tap: Tap, object_label: &str) -> VectorDomain {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(image));
    hasher.update(tap.x.to_bits().to_be_bytes());
    hasher.update(tap.y.to_bits().to_be_bytes());
    hasher.update(object_label.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let unit = (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64;

    let total: f64 = DOMAIN_WEIGHTS.iter().map(|(_, weight)| weight).sum();
    let mut remaining = unit * total;
    for (domain, weight) in DOMAIN_WEIGHTS {
        if remaining < weight {
            return domain;
        }
        remaining -= weight;
    }
    DOMAIN_WEIGHTS[DOMAIN_WEIGHTS.len() - 1].0
}

/// Anchor, seeds, domain commitment, system embedding, scale shift,
/// resemblance, optional attractor and the return signal.
pub fn seed_path(object_label: &str, seeds: &[String], domain: VectorDomain) -> Vec<ConceptHop> {
    const SEED_RELATIONS: [Relation; MAX_SEED_CONCEPTS] =
        [Relation::MadeOf, Relation::DerivedFrom, Relation::Resembles];

    let mut path = vec![ConceptHop::new(object_label, Relation::IsA)];
    for (seed, rel) in seeds.iter().zip(SEED_RELATIONS) {
        path.push(ConceptHop::new(seed.clone(), rel));
    }
    path.push(ConceptHop::new(
        format!("{} dynamics", domain.phrase()),
        Relation::EnabledBy,
    ));
    path.push(ConceptHop::new(
        "networked system behavior",
        Relation::EmbeddedIn,
    ));
    path.push(ConceptHop::new(
        "micro-to-macro scale inversion",
        Relation::ScaledTo,
    ));
    path.push(ConceptHop::new("observer entanglement", Relation::Resembles));
    if let Some(name) = attractor(domain) {
        path.push(ConceptHop::new(name, Relation::HistoricallyEntangledWith));
    }
    path.push(ConceptHop::new("scene-level return signal", Relation::Feeds));
    path
}

pub fn safety_path(anchor: &str) -> Vec<ConceptHop> {
    vec![
        ConceptHop::new(anchor, Relation::IsA),
        ConceptHop::new("pattern recognition", Relation::EnabledBy),
        ConceptHop::new("classification thresholds", Relation::ConstrainedBy),
        ConceptHop::new("institutional anonymity", Relation::EmbeddedIn),
        ConceptHop::new("ethics of naming", Relation::HistoricallyEntangledWith),
        ConceptHop::new("scene-level return signal", Relation::Feeds),
    ]
}

/// Walks the safety vocabulary from the current depth and takes the first
/// node not already on the path; suffixes only once every node is used.
pub fn next_safety_hop(path: &[ConceptHop]) -> ConceptHop {
    let start = path.len() % SAFETY_DEEPEN_HOPS.len();
    let on_path = |node: &str| path.iter().any(|hop| hop.node.eq_ignore_ascii_case(node));
    let fresh = SAFETY_DEEPEN_HOPS
        .iter()
        .cycle()
        .skip(start)
        .take(SAFETY_DEEPEN_HOPS.len())
        .find(|(node, _)| !on_path(node));
    match fresh {
        Some((node, rel)) => ConceptHop::new(*node, *rel),
        None => {
            let (node, rel) = SAFETY_DEEPEN_HOPS[start];
            ConceptHop::new(distinct_node(node, path), rel)
        }
    }
}

/// First meaningful line of a model answer, capped at [`MAX_CONCEPT_WORDS`].
pub fn sanitize_concept(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let stripped = line
        .trim_start_matches(|ch: char| {
            ch.is_ascii_digit() || matches!(ch, '-' | '*' | '•' | '.' | ')' | ' ')
        })
        .trim_matches(|ch: char| {
            matches!(ch, '"' | '\'' | '`' | '“' | '”' | '.' | ',' | ';' | ':' | '!' | '?')
        });
    let words: Vec<&str> = stripped.split_whitespace().take(MAX_CONCEPT_WORDS).collect();
    if words.is_empty() || !words.iter().any(|word| word.chars().any(char::is_alphanumeric)) {
        return None;
    }
    Some(words.join(" "))
}

pub fn fallback_concept(domain: VectorDomain, path: &[ConceptHop]) -> String {
    let suffix = FALLBACK_SUFFIXES[path.len() % FALLBACK_SUFFIXES.len()];
    distinct_node(&format!("{} {suffix}", domain.phrase()), path)
}

fn distinct_node(base: &str, path: &[ConceptHop]) -> String {
    let taken = |candidate: &str| {
        path.iter()
            .any(|hop| hop.node.eq_ignore_ascii_case(candidate))
    };
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|pass| format!("{base}, pass {pass}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub ending_type: EndingType,
    pub dark_flag: bool,
}

pub fn classify(
    prior_dark: bool,
    domain: VectorDomain,
    depth: usize,
    paragraph: &str,
    object_label: &str,
) -> Classification {
    let dark_flag = prior_dark || is_dark_domain(domain) || depth >= DARK_DEPTH;
    let ending_type = if dark_flag || depth >= DESTABILIZED_DEPTH {
        EndingType::Destabilized
    } else if ends_suspended(paragraph) {
        EndingType::Open
    } else if closing_sentence(paragraph)
        .to_lowercase()
        .contains(&object_label.to_lowercase())
    {
        EndingType::Resolved
    } else {
        EndingType::Open
    };
    Classification {
        ending_type,
        dark_flag,
    }
}

fn trim_closing_quotes(text: &str) -> &str {
    text.trim_end()
        .trim_end_matches(|ch: char| matches!(ch, '"' | '\'' | '”' | '’' | ')'))
}

fn ends_suspended(paragraph: &str) -> bool {
    let tail = trim_closing_quotes(paragraph);
    tail.ends_with('?') || tail.ends_with('…') || tail.ends_with("...")
}

fn closing_sentence(paragraph: &str) -> &str {
    let body = trim_closing_quotes(paragraph)
        .trim_end_matches(|ch: char| matches!(ch, '.' | '!' | '?' | '…'));
    body.rsplit(|ch: char| matches!(ch, '.' | '!' | '?' | '…'))
        .next()
        .unwrap_or(body)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedPlan {
    pub object_label: String,
    pub domain: VectorDomain,
    pub descriptors: Vec<String>,
    pub concept_path: Vec<ConceptHop>,
    /// The region must not be narrated; use the safety fallback.
    pub safety: bool,
}

impl SeedPlan {
    pub fn safety(object_label: &str, descriptors: Vec<String>) -> Self {
        Self {
            object_label: object_label.to_string(),
            domain: VectorDomain::FeedbackControl,
            descriptors,
            concept_path: safety_path(object_label),
            safety: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub hop: ConceptHop,
    pub safety: bool,
}

#[derive(Debug, Clone)]
pub struct DriftEngine {
    providers: Providers,
}

impl DriftEngine {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// One vision call. A declined or sensitive region yields a safety plan.
    pub fn seed(&self, image: &[u8], tap: Tap) -> Result<SeedPlan, ProviderError> {
        let description = match self
            .providers
            .vision
            .describe_region(&RegionRequest { image, tap })
        {
            Ok(description) => description,
            Err(ProviderError::ContentDisallowed(reason)) => {
                tracing::warn!(%reason, "vision provider declined the region");
                return Ok(SeedPlan::safety(UNIDENTIFIED_LABEL, Vec::new()));
            }
            Err(err) => return Err(err),
        };

        let label = description.object_label.trim();
        let label = if label.is_empty() { "object" } else { label };
        if description.sensitive {
            return Ok(SeedPlan::safety(label, description.scene_descriptors));
        }

        let mut seeds: Vec<String> = Vec::new();
        for concept in description.seed_concepts.iter().filter_map(|raw| sanitize_concept(raw)) {
            if seeds.len() == MAX_SEED_CONCEPTS {
                break;
            }
            if !seeds.iter().any(|seed| seed.eq_ignore_ascii_case(&concept)) {
                seeds.push(concept);
            }
        }
        let object_label = if seeds.is_empty() {
            seeds = GENERIC_SEEDS.iter().map(|seed| seed.to_string()).collect();
            UNIDENTIFIED_LABEL.to_string()
        } else {
            label.to_string()
        };

        let domain = choose_domain(image, tap, &object_label);
        let concept_path = seed_path(&object_label, &seeds, domain);
        Ok(SeedPlan {
            object_label,
            domain,
            descriptors: description.scene_descriptors,
            concept_path,
            safety: false,
        })
    }

    /// One text call, or none when the trace is already in the safety branch.
    pub fn extend(&self, trace: &Trace) -> Result<Extension, ProviderError> {
        let path = &trace.concept_path;
        if trace.safety_flag {
            return Ok(Extension {
                hop: next_safety_hop(path),
                safety: true,
            });
        }

        let context = PromptContext {
            purpose: PromptPurpose::NextConcept,
            object_label: trace.object_label.clone(),
            domain: trace.vector_domain,
            descriptors: Vec::new(),
            path: path.clone(),
            prior_paragraph: Some(trace.paragraph_text.clone()),
            evidence: Vec::new(),
            attempt: 0,
            previous_violations: Vec::new(),
        };
        let answer = match self.providers.text.continue_text(&context) {
            Ok(draft) => sanitize_concept(&draft.text),
            Err(ProviderError::ContentDisallowed(reason)) => {
                tracing::warn!(trace_id = %trace.trace_id, %reason, "text provider declined the next concept");
                return Ok(Extension {
                    hop: next_safety_hop(path),
                    safety: true,
                });
            }
            Err(err) => return Err(err),
        };

        let node = answer
            .filter(|node| !path.iter().any(|hop| hop.node.eq_ignore_ascii_case(node)))
            .unwrap_or_else(|| fallback_concept(trace.vector_domain, path));
        let rel = DEEPEN_RELATIONS[path.len() % DEEPEN_RELATIONS.len()];
        Ok(Extension {
            hop: ConceptHop::new(node, rel),
            safety: false,
        })
    }
}
