// src/errors.rs
use thiserror::Error;

/// Failures surfaced to callers of the resolver.
///
/// Only `InvalidInput` and `SearchUnavailable` ever leave `MatchOrchestrator::resolve`;
/// cache and reasoning failures are logged and degraded internally, and exist here so
/// collaborator adapters can classify what went wrong.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("search index unavailable: {0}")]
    SearchUnavailable(String),
    #[error("exact-match cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(String),
    #[error("malformed reasoning response: {0}")]
    MalformedResponse(String),
}

impl MatchError {
    pub fn search(err: anyhow::Error) -> Self {
        MatchError::SearchUnavailable(format!("{:#}", err))
    }
}
