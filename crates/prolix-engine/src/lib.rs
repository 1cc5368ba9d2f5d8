//! Drift planning, evidence retrieval, paragraph drafting and the narration
//! service that ties them to a trace store.

pub mod config;
pub mod drift;
pub mod narration;
pub mod providers;
pub mod retrieval;
pub mod service;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ProviderConfig};
pub use providers::{ProviderClient, ProviderError, Providers};
pub use retrieval::{CorpusError, RetrievalService};
pub use service::{CancellationFlag, GenerateResponse, NarrationService};
