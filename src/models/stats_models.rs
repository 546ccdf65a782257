// src/models/stats_models.rs
use serde::Serialize;

/// Point-in-time copy of the exact-match cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
    pub skipped_updates: u64,
    pub errors: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Point-in-time copy of the orchestrator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResolverStatsSnapshot {
    pub requests: u64,
    pub matches: u64,
    pub potential_matches: u64,
    pub no_matches: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub fast_path_hits: u64,
    pub escalations_attempted: u64,
    pub escalations_accepted: u64,
    pub enhancer_runs: u64,
    pub ai_calls: u64,
    pub ai_failures: u64,
}

/// Aggregated reasoning-service usage for one operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub operation: String,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_latency_ms: u64,
}
