// src/lib.rs
pub mod ai;
pub mod cache;
pub mod errors;
pub mod matching;
pub mod models;
pub mod registry;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use errors::MatchError;
pub use matching::MatchOrchestrator;
pub use models::{CompanyContext, MatchRequest, MatchResponse};
