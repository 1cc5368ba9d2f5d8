//! Structural checks every stored or returned paragraph must pass.
//!
//! The contract is deliberately small: one logical paragraph, a bounded word
//! count and some actual content. Softer stylistic expectations live in
//! [`style_notes`] and are reported, never enforced.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_WORDS: usize = 250;
pub const MAX_WORDS: usize = 350;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    WordCount { count: usize, min: usize, max: usize },
    MultipleParagraphs { blocks: usize },
    EmptyContent,
}

impl Violation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WordCount { .. } => "word_count",
            Self::MultipleParagraphs { .. } => "single_paragraph",
            Self::EmptyContent => "empty_content",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WordCount { count, min, max } => {
                write!(f, "word count {count} outside [{min}, {max}]")
            }
            Self::MultipleParagraphs { blocks } => {
                write!(f, "expected one paragraph, found {blocks}")
            }
            Self::EmptyContent => write!(f, "paragraph has no content"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrationContract {
    pub min_words: usize,
    pub max_words: usize,
}

impl Default for NarrationContract {
    fn default() -> Self {
        Self {
            min_words: MIN_WORDS,
            max_words: MAX_WORDS,
        }
    }
}

impl NarrationContract {
    /// Returns every violation found, not just the first.
    pub fn check(&self, text: &str) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();

        if !text.chars().any(char::is_alphanumeric) {
            violations.push(Violation::EmptyContent);
        }

        let count = word_count(text);
        if count < self.min_words || count > self.max_words {
            violations.push(Violation::WordCount {
                count,
                min: self.min_words,
                max: self.max_words,
            });
        }

        let blocks = paragraph_blocks(text);
        if blocks > 1 {
            violations.push(Violation::MultipleParagraphs { blocks });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn is_satisfied_by(&self, text: &str) -> bool {
        self.check(text).is_ok()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Counts runs of non-blank lines. A whitespace-only line separates blocks;
/// a single line break inside prose does not.
pub fn paragraph_blocks(text: &str) -> usize {
    let mut blocks = 0;
    let mut in_block = false;
    for line in text.lines() {
        if line.trim().is_empty() {
            in_block = false;
            continue;
        }
        if !in_block {
            blocks += 1;
            in_block = true;
        }
    }
    blocks
}

const CONCLUSION_MARKERS: [&str; 4] = [
    "in essence",
    "ultimately",
    "this perspective urges",
    "this shows that",
];

const SCALE_SHIFT_CUES: [&str; 8] = [
    "micron",
    "planetary",
    "centuries",
    "millions",
    "infrared",
    "global shipment",
    "kilometer",
    "millimeter",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleNote {
    SecondPerson,
    ConclusionMarker,
    MissingScaleShift,
}

/// Advisory findings for the journal; none of these block persistence.
pub fn style_notes(text: &str) -> Vec<StyleNote> {
    let lowered = text.to_lowercase();
    let mut notes = Vec::new();

    let second_person = lowered
        .split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
        .any(|token| matches!(token, "you" | "your" | "we"));
    if second_person {
        notes.push(StyleNote::SecondPerson);
    }
    if CONCLUSION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        notes.push(StyleNote::ConclusionMarker);
    }
    if !SCALE_SHIFT_CUES.iter().any(|cue| lowered.contains(cue)) {
        notes.push(StyleNote::MissingScaleShift);
    }
    notes
}
