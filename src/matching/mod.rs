pub mod confidence;
pub mod escalation;
pub mod formatter;
pub mod normalize;
pub mod orchestrator;
pub mod search;
pub mod similarity;

pub use orchestrator::{MatchOrchestrator, ResolutionTrace};
pub use search::{CompanySearchQuery, SearchIndex};
