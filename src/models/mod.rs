pub mod core;
pub mod matching;
pub mod stats_models;

pub use self::core::{CacheEntry, CompanyContext, CompanyRecord, MatchType};
pub use self::matching::{
    ConfidenceFactors, MatchCandidate, MatchDetail, MatchOptions, MatchRequest, MatchResponse,
    ScoredCandidate, sort_by_confidence,
};
pub use self::stats_models::{CacheStatsSnapshot, ResolverStatsSnapshot, UsageSummary};
