// src/ai/types.rs - Request and response contracts of the reasoning service
use serde::{Deserialize, Serialize};

use crate::models::ScoredCandidate;

/// Per-call options forwarded to every reasoning request of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningOptions {
    /// Overrides the service's configured model.
    pub model: Option<String>,
}

/// Token and latency metadata reported by a reasoning call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
}

/// A reasoning result with the usage it cost. `usage` is `None` when nothing was
/// spent (e.g. a memoized answer).
#[derive(Debug, Clone, PartialEq)]
pub struct Reasoned<T> {
    pub value: T,
    pub usage: Option<TokenUsage>,
}

impl<T> Reasoned<T> {
    pub fn new(value: T, usage: Option<TokenUsage>) -> Self {
        Self { value, usage }
    }

    pub fn free(value: T) -> Self {
        Self { value, usage: None }
    }
}

/// What the reasoning service is told about one candidate entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub index: usize,
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub confidence: f64,
}

impl CandidateSummary {
    pub fn from_scored(index: usize, candidate: &ScoredCandidate) -> Self {
        let record = &candidate.record;
        let mut aliases: Vec<String> = record.submitting_names.clone();
        aliases.extend(record.ai_aliases.iter().cloned());
        Self {
            index,
            id: record.id.clone(),
            name: record.name().to_string(),
            parent: record.parent_display_name.clone(),
            aliases,
            industry: record.industry.clone(),
            region: record.region.clone(),
            size: record.size.clone(),
            confidence: candidate.confidence,
        }
    }
}

/// Clamps a model-reported confidence into [0, 1]; NaN counts as no confidence.
pub fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MatchEvaluation {
    pub is_match: bool,
    /// Probability that the query names the candidate.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    /// Alternative company names worth searching when this is not a match.
    #[serde(default)]
    pub suggested_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AbbreviationCheck {
    pub is_abbreviation: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub expanded_form: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Disambiguation {
    /// Index into the candidates sent, `None` when none fits.
    #[serde(default)]
    pub best_index: Option<usize>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchScore {
    pub index: usize,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchEvaluation {
    #[serde(default)]
    pub scores: Vec<BatchScore>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TypoDetection {
    pub is_typo: bool,
    #[serde(default)]
    pub corrected_name: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TypoVariations {
    #[serde(default)]
    pub variations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CorporateStructure {
    pub is_subsidiary: bool,
    #[serde(default)]
    pub parent_candidates: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParentIdentification {
    pub is_subsidiary: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoricalNameDetection {
    pub is_historical: bool,
    #[serde(default)]
    pub current_names: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoricalCompanyCheck {
    pub is_same_company: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameSuggestion {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AbbreviationGuesses {
    #[serde(default)]
    pub guesses: Vec<NameSuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SmartQueries {
    #[serde(default)]
    pub queries: Vec<NameSuggestion>,
}

/// Suggestions at or above `min_confidence`, best first, at most `limit`, with blank
/// and repeated names dropped.
pub fn confident_suggestions(
    suggestions: &[NameSuggestion],
    min_confidence: f64,
    limit: usize,
) -> Vec<NameSuggestion> {
    let mut kept: Vec<NameSuggestion> = suggestions
        .iter()
        .filter(|s| !s.name.trim().is_empty() && unit(s.confidence) >= min_confidence)
        .cloned()
        .collect();
    kept.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut seen = std::collections::HashSet::new();
    kept.retain(|s| seen.insert(s.name.trim().to_lowercase()));
    kept.truncate(limit);
    kept
}
