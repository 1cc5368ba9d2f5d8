use thiserror::Error;

use crate::contract::Violation;
use crate::trace::TraceId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("trace {0} not found")]
    NotFound(TraceId),

    #[error("trace {0} already exists")]
    AlreadyExists(TraceId),

    #[error("refusing to persist paragraph: {}", join_violations(.0))]
    InvalidParagraph(Vec<Violation>),

    #[error("trace store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("trace store lock poisoned")]
    Poisoned,
}

/// Failures surfaced by the generate/deepen operations.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{provider} provider unavailable after {attempts} attempt(s): {reason}")]
    ProviderUnavailable {
        provider: String,
        attempts: u32,
        reason: String,
    },

    #[error("narration contract violated after {attempts} draft(s): {}", join_violations(.violations))]
    ContractViolation {
        attempts: u32,
        violations: Vec<Violation>,
    },

    #[error("trace {0} not found")]
    NotFound(TraceId),

    #[error("trace {0} is already being modified")]
    Conflict(TraceId),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request cancelled before the result was persisted")]
    Cancelled,

    #[error(transparent)]
    Storage(StoreError),
}

impl NarrationError {
    /// Stable machine-readable tag, used in HTTP error bodies and the journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ContractViolation { .. } => "contract_violation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Configuration(_) => "configuration_error",
            Self::Cancelled => "cancelled",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<StoreError> for NarrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::AlreadyExists(id) => Self::Conflict(id),
            StoreError::InvalidParagraph(violations) => Self::ContractViolation {
                attempts: 0,
                violations,
            },
            other => Self::Storage(other),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let id = TraceId::generate();
        assert!(matches!(
            NarrationError::from(StoreError::NotFound(id.clone())),
            NarrationError::NotFound(found) if found == id
        ));
        assert_eq!(
            NarrationError::from(StoreError::AlreadyExists(id)).kind(),
            "conflict"
        );
        assert_eq!(
            NarrationError::from(StoreError::Poisoned).kind(),
            "storage_error"
        );
    }

    #[test]
    fn contract_violation_message_lists_violations() {
        let err = NarrationError::ContractViolation {
            attempts: 3,
            violations: vec![
                Violation::EmptyContent,
                Violation::MultipleParagraphs { blocks: 2 },
            ],
        };
        assert_eq!(
            err.to_string(),
            "narration contract violated after 3 draft(s): paragraph has no content; expected one paragraph, found 2"
        );
    }
}
