mod external;
mod mock;
pub mod retry;

use std::sync::Arc;

use prolix_contracts::contract::Violation;
use prolix_contracts::trace::{ConceptHop, VectorDomain};
use thiserror::Error;

pub use external::ExternalProvider;
pub use mock::MockProvider;

use crate::config::{ConfigError, EndpointConfig, ProviderConfig, ProviderKind};
use crate::retrieval::Snippet;
use retry::RetryPolicy;

/// Normalized tap position; both axes lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tap {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionRequest<'a> {
    pub image: &'a [u8],
    pub tap: Tap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescription {
    pub object_label: String,
    pub seed_concepts: Vec<String>,
    pub scene_descriptors: Vec<String>,
    /// Faces, licence plates and similar identifying content.
    pub sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPurpose {
    /// One short concept phrase continuing the path.
    NextConcept,
    /// A full narration paragraph for the path.
    Paragraph,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub purpose: PromptPurpose,
    pub object_label: String,
    pub domain: VectorDomain,
    pub descriptors: Vec<String>,
    pub path: Vec<ConceptHop>,
    pub prior_paragraph: Option<String>,
    /// Corpus snippets the paragraph may draw on.
    pub evidence: Vec<Snippet>,
    /// Zero-based draft attempt.
    pub attempt: u32,
    /// Violations of the previous draft, used as repair hints.
    pub previous_violations: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDraft {
    pub text: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider declined the content: {0}")]
    ContentDisallowed(String),

    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Unavailable { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    fn describe_region(&self, request: &RegionRequest<'_>)
        -> Result<RegionDescription, ProviderError>;

    fn continue_text(&self, context: &PromptContext) -> Result<TextDraft, ProviderError>;
}

/// The vision and text roles, which may be backed by different providers.
#[derive(Clone)]
pub struct Providers {
    pub vision: Arc<dyn ProviderClient>,
    pub text: Arc<dyn ProviderClient>,
}

impl Providers {
    pub fn mock() -> Self {
        let mock: Arc<dyn ProviderClient> = Arc::new(MockProvider::new());
        Self {
            vision: Arc::clone(&mock),
            text: mock,
        }
    }

    /// Blocking HTTP clients are created here, so call this outside any async
    /// runtime.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let retry = RetryPolicy::new(config.max_retries);
        Ok(Self {
            vision: build_provider(&config.vision, config, &retry)?,
            text: build_provider(&config.text, config, &retry)?,
        })
    }
}

fn build_provider(
    endpoint: &EndpointConfig,
    config: &ProviderConfig,
    retry: &RetryPolicy,
) -> Result<Arc<dyn ProviderClient>, ConfigError> {
    Ok(match endpoint.kind {
        ProviderKind::Mock => Arc::new(MockProvider::new()),
        ProviderKind::External => Arc::new(ExternalProvider::new(
            endpoint,
            config.request_timeout,
            retry.clone(),
        )?),
    })
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("vision", &self.vision.name())
            .field("text", &self.text.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_transient_errors_retry() {
        assert!(ProviderError::Timeout("slow".into()).is_retryable());
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(!ProviderError::Rejected("401".into()).is_retryable());
        assert!(!ProviderError::ContentDisallowed("refusal".into()).is_retryable());
        assert!(!ProviderError::Unavailable {
            attempts: 3,
            last_error: "503".into()
        }
        .is_retryable());
    }

    #[test]
    fn default_config_builds_mock_providers() -> anyhow::Result<()> {
        let providers = Providers::from_config(&ProviderConfig::default())?;
        assert_eq!(providers.vision.name(), "mock");
        assert_eq!(providers.text.name(), "mock");
        Ok(())
    }
}
