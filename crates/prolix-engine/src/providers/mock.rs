use image::GenericImageView;
use prolix_contracts::trace::{ConceptHop, Relation};
use sha2::{Digest, Sha256};

use super::{
    PromptContext, PromptPurpose, ProviderClient, ProviderError, RegionDescription,
    RegionRequest, TextDraft,
};

const MIN_DRAFT_WORDS: u64 = 270;
const DRAFT_WORD_SPREAD: u64 = 61;

const CONCEPT_MODIFIERS: [&str; 8] = [
    "latent",
    "migrating",
    "borrowed",
    "residual",
    "ledgered",
    "counterfeit",
    "tidal",
    "unclaimed",
];

const CONCEPT_NOUNS: [&str; 8] = [
    "heat signature",
    "trade route",
    "signal echo",
    "sediment layer",
    "census record",
    "tide table",
    "error margin",
    "supply ledger",
];

/// Deterministic offline provider. Same inputs, same outputs.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    disallow: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every request with [`ProviderError::ContentDisallowed`].
    pub fn disallowing() -> Self {
        Self { disallow: true }
    }

    fn declined(&self) -> Result<(), ProviderError> {
        if self.disallow {
            return Err(ProviderError::ContentDisallowed(
                "mock provider declines all content".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn describe_region(
        &self,
        request: &RegionRequest<'_>,
    ) -> Result<RegionDescription, ProviderError> {
        self.declined()?;
        let lowered = request.image.to_ascii_lowercase();
        let sensitive = contains(&lowered, b"face") || contains(&lowered, b"plate");

        let mut scene_descriptors = vec![
            format!("tap near x={:.2}", request.tap.x),
            format!("tap near y={:.2}", request.tap.y),
        ];
        let (label, seeds) = match image::load_from_memory(request.image) {
            Ok(decoded) => {
                let (width, height) = decoded.dimensions();
                let px = (request.tap.x * f64::from(width.saturating_sub(1))).round() as u32;
                let py = (request.tap.y * f64::from(height.saturating_sub(1))).round() as u32;
                let [r, g, b, _] = decoded
                    .get_pixel(px.min(width.saturating_sub(1)), py.min(height.saturating_sub(1)))
                    .0;
                scene_descriptors.push(format!("sampled colour #{}", hex::encode([r, g, b])));
                scene_descriptors.push(format!("{width}x{height} pixel frame"));
                colour_reading(r, g, b)
            }
            Err(_) => keyword_reading(&lowered),
        };
        scene_descriptors.push("ambient manufactured light".to_string());

        Ok(RegionDescription {
            object_label: label.to_string(),
            seed_concepts: seeds.iter().map(|seed| seed.to_string()).collect(),
            scene_descriptors,
            sensitive,
        })
    }

    fn continue_text(&self, context: &PromptContext) -> Result<TextDraft, ProviderError> {
        self.declined()?;
        let seed = context_seed(context);
        let text = match context.purpose {
            PromptPurpose::NextConcept => {
                let modifier = CONCEPT_MODIFIERS[(seed % 8) as usize];
                let noun = CONCEPT_NOUNS[((seed >> 8) % 8) as usize];
                format!("{modifier} {noun}\n")
            }
            PromptPurpose::Paragraph => compose_paragraph(context, seed),
        };
        Ok(TextDraft { text })
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

const LEAF_SEEDS: &[&str] = &["chlorophyll lattice", "stomatal gas exchange", "cellulose venation"];
const WIRE_SEEDS: &[&str] = &["drawn copper", "polymer insulation", "current path"];
const TIRE_SEEDS: &[&str] = &["vulcanized rubber", "carbon black filler", "tread abrasion"];
const BOTTLE_SEEDS: &[&str] = &["soda-lime glass", "annealing stress", "recycled cullet"];
const PAINTED_SEEDS: &[&str] = &["pigment film", "surface abrasion", "molded edge"];
const NO_SEEDS: &[&str] = &[];

type Reading = (&'static str, &'static [&'static str]);

fn colour_reading(r: u8, g: u8, b: u8) -> Reading {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    if luma < 60.0 {
        ("tire", TIRE_SEEDS)
    } else if max - min < 28 {
        ("wire", WIRE_SEEDS)
    } else if g == max {
        ("leaf", LEAF_SEEDS)
    } else if b == max {
        ("bottle", BOTTLE_SEEDS)
    } else {
        ("object", PAINTED_SEEDS)
    }
}

fn keyword_reading(lowered: &[u8]) -> Reading {
    let readings: [Reading; 4] = [
        ("leaf", LEAF_SEEDS),
        ("wire", WIRE_SEEDS),
        ("tire", TIRE_SEEDS),
        ("bottle", BOTTLE_SEEDS),
    ];
    readings
        .into_iter()
        .find(|(label, _)| contains(lowered, label.as_bytes()))
        .unwrap_or(("object", NO_SEEDS))
}

fn context_seed(context: &PromptContext) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(match context.purpose {
        PromptPurpose::NextConcept => b"next".as_slice(),
        PromptPurpose::Paragraph => b"para".as_slice(),
    });
    hasher.update(context.object_label.as_bytes());
    hasher.update(context.domain.as_str().as_bytes());
    for descriptor in &context.descriptors {
        hasher.update(descriptor.as_bytes());
        hasher.update([0u8]);
    }
    for hop in &context.path {
        hasher.update(hop.node.as_bytes());
        hasher.update(hop.rel.as_str().as_bytes());
    }
    if let Some(prior) = &context.prior_paragraph {
        hasher.update(prior.as_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

fn hop_sentence(hop: &ConceptHop, label: &str) -> String {
    let node = &hop.node;
    match hop.rel {
        Relation::IsA => format!("It is a {node}, nothing more, at least at first."),
        Relation::MadeOf => format!(
            "Look closer and it is {node}, a material with its own long memory of pressure and heat."
        ),
        Relation::DerivedFrom => format!(
            "That material was pulled out of {node}, far from here, by people who never saw this room."
        ),
        Relation::EnabledBy => format!(
            "None of it holds together without {node}, which quietly sets the terms for what the {label} can become."
        ),
        Relation::EmbeddedIn => format!(
            "The {label} already belongs to {node}, one node among millions passing small signals along."
        ),
        Relation::ScaledTo => format!(
            "At the scale of a millimeter its surface is a terrain of ridges, at the scale of centuries it is a brief event, and {node} trades one view for the other without warning."
        ),
        Relation::Resembles => format!(
            "It begins to resemble {node}, the way a river delta resembles a crack in old paint."
        ),
        Relation::HistoricallyEntangledWith => format!(
            "Somewhere in the record it brushes against {node}, a story that should be irrelevant and is not."
        ),
        Relation::Feeds => format!(
            "All of this feeds back into {node}, and the loop closes a little tighter around the {label}."
        ),
        Relation::MutatesInto => format!(
            "Given enough time it mutates into {node}, and nobody files a report when it happens."
        ),
        Relation::ComputedBy => format!(
            "Some patient process computes it as {node}, rounding away whatever does not fit."
        ),
        Relation::ConstrainedBy => format!(
            "It is held in place by {node}, a limit nobody chose and everybody obeys."
        ),
        Relation::StabilizedBy => format!(
            "For a while {node} keeps it steady, the way a thumb keeps a page from turning."
        ),
        Relation::NarratedAs => format!(
            "Later someone will tell it as {node}, and the telling will outlast the thing."
        ),
    }
}

fn filler_sentences(label: &str, domain: &str) -> Vec<String> {
    vec![
        "A thin film of dust records the last few weeks of air moving through the room.".to_string(),
        format!("Heat leaves the {label} at a rate nobody measures, a few milliwatts drifting into the infrared."),
        "Every scratch is a timestamp written by some forgotten contact.".to_string(),
        format!("The {domain} reading holds, then slips, then holds again."),
        "Light crosses it in a few nanoseconds and keeps going, indifferent to what it touched.".to_string(),
        "Somewhere a shipment manifest still lists its ancestors by weight and port of origin.".to_string(),
        format!("The {label} does not care, and that indifference is the most honest thing in the scene."),
        "Each edge is a negotiation between what was intended and what actually cooled into shape.".to_string(),
    ]
}

fn closing_sentence(label: &str, seed: u64) -> String {
    match (seed >> 16) % 3 {
        0 => format!(
            "And then it is only the {label} again, exactly where it was, a little heavier with everything it touched."
        ),
        1 => format!(
            "What the {label} is waiting for has not arrived yet, and it is not clear that it ever will…"
        ),
        _ => format!("Is the {label} still the same thing it was before anyone looked at it?"),
    }
}

fn evidence_sentence(title: &str, excerpt: &str) -> String {
    let excerpt = excerpt.trim();
    let stop = if excerpt.ends_with(&['.', '?', '!'][..]) { "" } else { "." };
    format!("A note filed under {} puts it plainly: {excerpt}{stop}", title.trim().to_lowercase())
}

/// Single-line paragraph with an exact, seed-derived word count.
fn compose_paragraph(context: &PromptContext, seed: u64) -> String {
    let label = context.object_label.as_str();
    let target = (MIN_DRAFT_WORDS + seed % DRAFT_WORD_SPREAD) as usize;
    let closing: Vec<String> = closing_sentence(label, seed)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let body_target = target.saturating_sub(closing.len());

    let mut sentences = Vec::new();
    let descriptor = context
        .descriptors
        .first()
        .map(String::as_str)
        .unwrap_or("under flat light");
    if context.prior_paragraph.is_some() {
        sentences.push(format!(
            "The thread picks up again at the {label}, {descriptor}, still holding the last thought in place."
        ));
    } else {
        sentences.push(format!(
            "The {label} sits at the edge of the frame, {descriptor}, ordinary enough that nobody has looked at it properly for years."
        ));
    }
    if let Some(snippet) = context.evidence.first() {
        sentences.push(evidence_sentence(&snippet.title, &snippet.excerpt));
    }
    for hop in context.path.iter().skip(1) {
        sentences.push(hop_sentence(hop, label));
    }
    let fillers = filler_sentences(label, &context.domain.phrase());
    let offset = (seed >> 24) as usize % fillers.len();

    let mut words: Vec<String> = Vec::with_capacity(target);
    let mut filler_idx = 0usize;
    let mut sentence_iter = sentences.into_iter();
    while words.len() < body_target {
        let sentence = match sentence_iter.next() {
            Some(sentence) => sentence,
            None => {
                let next = fillers[(offset + filler_idx) % fillers.len()].clone();
                filler_idx += 1;
                next
            }
        };
        words.extend(sentence.split_whitespace().map(str::to_string));
    }
    words.truncate(body_target);
    if let Some(last) = words.last_mut() {
        let trimmed = last.trim_end_matches(&[',', ';', ':'][..]).to_string();
        *last = if trimmed.ends_with(&['.', '?', '!'][..]) {
            trimmed
        } else {
            format!("{trimmed}.")
        };
    }
    words.extend(closing);
    words.join(" ")
}
