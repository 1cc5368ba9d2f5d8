use prolix_contracts::contract::{NarrationContract, Violation};

use crate::providers::{PromptContext, PromptPurpose, ProviderClient, ProviderError};

pub const DEFAULT_REGENERATION_CEILING: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Drafted {
    pub text: String,
    /// Draft calls made, including the accepted one.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DraftFailure {
    Provider(ProviderError),
    Contract {
        attempts: u32,
        violations: Vec<Violation>,
    },
}

/// Drafts a paragraph and regenerates while it breaks the contract.
#[derive(Debug, Clone, Copy)]
pub struct Narrator {
    contract: NarrationContract,
    regeneration_ceiling: u32,
}

impl Default for Narrator {
    fn default() -> Self {
        Self::new(DEFAULT_REGENERATION_CEILING)
    }
}

impl Narrator {
    pub fn new(regeneration_ceiling: u32) -> Self {
        Self {
            contract: NarrationContract::default(),
            regeneration_ceiling,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.regeneration_ceiling.saturating_add(1)
    }

    /// Runs at most [`Narrator::max_attempts`] draft calls. Each retry carries
    /// the previous violations as repair hints. Text is never truncated or
    /// padded; `on_reject` sees every rejected draft.
    pub fn draft<F>(
        &self,
        provider: &dyn ProviderClient,
        mut context: PromptContext,
        mut on_reject: F,
    ) -> Result<Drafted, DraftFailure>
    where
        F: FnMut(u32, &[Violation]),
    {
        context.purpose = PromptPurpose::Paragraph;
        let mut last_violations: Vec<Violation> = Vec::new();

        for attempt in 0..self.max_attempts() {
            context.attempt = attempt;
            context.previous_violations = last_violations.clone();
            let draft = provider
                .continue_text(&context)
                .map_err(DraftFailure::Provider)?;

            match self.contract.check(&draft.text) {
                Ok(()) => {
                    return Ok(Drafted {
                        text: draft.text,
                        attempts: attempt + 1,
                    })
                }
                Err(violations) => {
                    tracing::warn!(
                        provider = provider.name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        violations = ?violations.iter().map(Violation::code).collect::<Vec<_>>(),
                        "draft rejected by narration contract"
                    );
                    on_reject(attempt + 1, &violations);
                    last_violations = violations;
                }
            }
        }

        Err(DraftFailure::Contract {
            attempts: self.max_attempts(),
            violations: last_violations,
        })
    }
}
