// src/ai/usage.rs - Token/latency usage sink for reasoning calls
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::ai::types::TokenUsage;
use crate::models::UsageSummary;

/// Receives usage metadata for every successful reasoning call. Metadata only: nothing
/// recorded here feeds back into scoring.
pub trait UsageSink: Send + Sync {
    fn record(&self, operation: &str, usage: &TokenUsage);
}

/// Logs each call at debug level and aggregates totals per operation.
#[derive(Debug, Default)]
pub struct LoggingUsageSink {
    totals: Mutex<HashMap<String, UsageSummary>>,
}

impl LoggingUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregates per operation, most-called first.
    pub fn summaries(&self) -> Vec<UsageSummary> {
        let mut summaries: Vec<UsageSummary> = match self.totals.lock() {
            Ok(totals) => totals.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        summaries.sort_by(|a, b| b.calls.cmp(&a.calls).then(a.operation.cmp(&b.operation)));
        summaries
    }

    pub fn total_tokens(&self) -> u64 {
        self.summaries()
            .iter()
            .map(|s| s.prompt_tokens + s.completion_tokens)
            .sum()
    }
}

impl UsageSink for LoggingUsageSink {
    fn record(&self, operation: &str, usage: &TokenUsage) {
        debug!(
            "🤖 {} used {} prompt + {} completion tokens in {}ms",
            operation, usage.prompt_tokens, usage.completion_tokens, usage.latency_ms
        );
        let mut totals = match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = totals
            .entry(operation.to_string())
            .or_insert_with(|| UsageSummary {
                operation: operation.to_string(),
                ..Default::default()
            });
        entry.calls += 1;
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_latency_ms += usage.latency_ms;
    }
}
