// src/utils/matcher_config.rs
use anyhow::{bail, Result};
use log::{info, warn};
use std::env;
use std::time::Duration;

/// Linear weights applied to the three confidence factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceWeights {
    pub relevance: f64,
    pub similarity: f64,
    pub context: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            relevance: 0.3,
            similarity: 0.5,
            context: 0.2,
        }
    }
}

/// How a base confidence and an AI confidence are blended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub base: f64,
    pub ai: f64,
}

impl BlendWeights {
    pub fn blend(&self, base: f64, ai: f64) -> f64 {
        (self.base * base + self.ai * ai).clamp(0.0, 1.0)
    }
}

/// Thresholds and tuning for one resolver instance. Read once per call through an
/// `Arc` snapshot held by the orchestrator.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// At or above this the fast path accepts without the reasoning service.
    pub high_confidence_threshold: f64,
    /// Minimum top confidence formatted as a `Match`; below it escalation runs.
    pub match_threshold: f64,
    /// Candidates below this are dropped from potential matches.
    pub low_confidence_threshold: f64,
    /// Top two confidences within this distance are ambiguous.
    pub ambiguity_threshold: f64,
    pub ai_band_min: f64,
    pub ai_band_max: f64,
    pub max_depth: usize,
    pub search_limit: usize,
    pub min_confidence_for_caching: f64,
    pub max_entries_per_record: usize,
    pub weights: ConfidenceWeights,
    pub validation_blend: BlendWeights,
    pub disambiguation_blend: BlendWeights,
    pub collaborator_timeout: Duration,
    pub ai_enabled: bool,
    pub usage_tracking_enabled: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.95,
            match_threshold: 0.90,
            low_confidence_threshold: 0.30,
            ambiguity_threshold: 0.05,
            ai_band_min: 0.50,
            ai_band_max: 0.90,
            max_depth: 2,
            search_limit: 20,
            min_confidence_for_caching: 0.90,
            max_entries_per_record: 50,
            weights: ConfidenceWeights::default(),
            validation_blend: BlendWeights { base: 0.4, ai: 0.6 },
            disambiguation_blend: BlendWeights { base: 0.3, ai: 0.7 },
            collaborator_timeout: Duration::from_secs(10),
            ai_enabled: true,
            usage_tracking_enabled: true,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparseable {}='{}', using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl MatcherConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            high_confidence_threshold: env_or("MATCH_HIGH_CONFIDENCE", d.high_confidence_threshold),
            match_threshold: env_or("MATCH_THRESHOLD", d.match_threshold),
            low_confidence_threshold: env_or("MATCH_LOW_CONFIDENCE", d.low_confidence_threshold),
            ambiguity_threshold: env_or("MATCH_AMBIGUITY_THRESHOLD", d.ambiguity_threshold),
            ai_band_min: env_or("MATCH_AI_BAND_MIN", d.ai_band_min),
            ai_band_max: env_or("MATCH_AI_BAND_MAX", d.ai_band_max),
            max_depth: env_or("MATCH_MAX_DEPTH", d.max_depth),
            search_limit: env_or("MATCH_SEARCH_LIMIT", d.search_limit),
            min_confidence_for_caching: env_or("CACHE_MIN_CONFIDENCE", d.min_confidence_for_caching),
            max_entries_per_record: env_or("CACHE_MAX_ENTRIES_PER_RECORD", d.max_entries_per_record),
            weights: ConfidenceWeights {
                relevance: env_or("WEIGHT_RELEVANCE", d.weights.relevance),
                similarity: env_or("WEIGHT_SIMILARITY", d.weights.similarity),
                context: env_or("WEIGHT_CONTEXT", d.weights.context),
            },
            validation_blend: BlendWeights {
                base: env_or("AI_VALIDATION_BASE_WEIGHT", d.validation_blend.base),
                ai: env_or("AI_VALIDATION_AI_WEIGHT", d.validation_blend.ai),
            },
            disambiguation_blend: BlendWeights {
                base: env_or("AI_DISAMBIGUATION_BASE_WEIGHT", d.disambiguation_blend.base),
                ai: env_or("AI_DISAMBIGUATION_AI_WEIGHT", d.disambiguation_blend.ai),
            },
            collaborator_timeout: Duration::from_millis(env_or(
                "COLLABORATOR_TIMEOUT_MS",
                d.collaborator_timeout.as_millis() as u64,
            )),
            ai_enabled: env_or("AI_ENABLED", d.ai_enabled),
            usage_tracking_enabled: env_or("AI_USAGE_TRACKING", d.usage_tracking_enabled),
        }
    }

    /// Rejects configurations the decision engine cannot reason about.
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("high_confidence_threshold", self.high_confidence_threshold),
            ("match_threshold", self.match_threshold),
            ("low_confidence_threshold", self.low_confidence_threshold),
            ("ai_band_min", self.ai_band_min),
            ("ai_band_max", self.ai_band_max),
            ("min_confidence_for_caching", self.min_confidence_for_caching),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.low_confidence_threshold > self.match_threshold
            || self.match_threshold > self.high_confidence_threshold
        {
            bail!(
                "thresholds must satisfy low ({}) <= match ({}) <= high ({})",
                self.low_confidence_threshold,
                self.match_threshold,
                self.high_confidence_threshold
            );
        }
        if self.ai_band_min >= self.ai_band_max {
            bail!(
                "AI band is empty: [{}, {})",
                self.ai_band_min,
                self.ai_band_max
            );
        }
        let w = self.weights;
        if w.relevance < 0.0 || w.similarity < 0.0 || w.context < 0.0 {
            bail!("confidence weights must be non-negative");
        }
        if w.similarity <= w.relevance || w.similarity <= w.context {
            bail!("string similarity must carry the largest confidence weight");
        }
        if self.max_entries_per_record == 0 || self.search_limit == 0 {
            bail!("cache capacity and search limit must be positive");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!("⚙️  Matcher configuration:");
        info!(
            "   Thresholds: high={:.2}, match={:.2}, low={:.2}, ambiguity={:.2}",
            self.high_confidence_threshold,
            self.match_threshold,
            self.low_confidence_threshold,
            self.ambiguity_threshold
        );
        info!(
            "   Weights: relevance={:.2}, similarity={:.2}, context={:.2}",
            self.weights.relevance, self.weights.similarity, self.weights.context
        );
        info!(
            "   Search: limit={}, max depth={}, collaborator timeout={:?}",
            self.search_limit, self.max_depth, self.collaborator_timeout
        );
        info!(
            "   Cache: min confidence={:.2}, max entries/record={}",
            self.min_confidence_for_caching, self.max_entries_per_record
        );
        if self.ai_enabled {
            info!(
                "🤖 Reasoning service ENABLED (uncertain band [{:.2}, {:.2}), usage tracking={})",
                self.ai_band_min, self.ai_band_max, self.usage_tracking_enabled
            );
        } else {
            info!("🤖 Reasoning service DISABLED - using base confidence scores only");
        }
    }
}
