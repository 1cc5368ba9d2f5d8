//! Evidence snippets drawn from a local corpus of `*.json` files, each a list
//! of `{title, excerpt, domain_tag, source_id}` records.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use prolix_contracts::trace::VectorDomain;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EVIDENCE_LIMIT: usize = 12;

const TERM_SCORE: u32 = 3;
const DOMAIN_TAG_SCORE: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub domain_tag: String,
    pub source_id: String,
}

impl Snippet {
    /// `title: excerpt`, the form handed to providers.
    pub fn fragment(&self) -> String {
        format!("{}: {}", self.title, self.excerpt)
    }

    fn fallback() -> Self {
        Self {
            title: "Entropy and prediction".to_string(),
            excerpt: "Information processing is paid for in heat, delay, and substrate."
                .to_string(),
            domain_tag: VectorDomain::ThermodynamicsEntropy.as_str().to_string(),
            source_id: "core-entropy".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid corpus file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalService {
    snippets: Vec<Snippet>,
}

impl RetrievalService {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_snippets(snippets: Vec<Snippet>) -> Self {
        Self { snippets }
    }

    /// Reads every `*.json` file in `corpus_dir` in file-name order. A missing
    /// directory is an empty corpus.
    pub fn load(corpus_dir: &Path) -> Result<Self, CorpusError> {
        if !corpus_dir.is_dir() {
            return Ok(Self::empty());
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| CorpusError::Io { path, source }
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(corpus_dir).map_err(io_err(corpus_dir))? {
            let path = entry.map_err(io_err(corpus_dir))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut snippets = Vec::new();
        for path in files {
            let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
            let batch: Vec<Snippet> = serde_json::from_str(&raw)
                .map_err(|source| CorpusError::Parse { path: path.clone(), source })?;
            snippets.extend(batch);
        }
        tracing::debug!(dir = %corpus_dir.display(), snippets = snippets.len(), "corpus loaded");
        Ok(Self { snippets })
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Top `limit` snippets by label and domain match. Ties keep corpus
    /// order. Never empty: an empty corpus yields the entropy fallback.
    pub fn retrieve(&self, object_label: &str, domain: VectorDomain, limit: usize) -> Vec<Snippet> {
        let mut terms = vec![object_label.to_lowercase(), domain.phrase()];
        terms.dedup();
        let mut scored: Vec<(u32, &Snippet)> = self
            .snippets
            .iter()
            .map(|snippet| {
                let text = format!(
                    "{} {} {}",
                    snippet.title, snippet.excerpt, snippet.domain_tag
                )
                .to_lowercase();
                let mut score = terms
                    .iter()
                    .filter(|term| text.contains(term.as_str()))
                    .count() as u32
                    * TERM_SCORE;
                if snippet.domain_tag == domain.as_str() {
                    score += DOMAIN_TAG_SCORE;
                }
                (score, snippet)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let top: Vec<Snippet> = scored
            .into_iter()
            .take(limit)
            .map(|(_, snippet)| snippet.clone())
            .collect();
        if top.is_empty() {
            return vec![Snippet::fallback()];
        }
        top
    }
}
