// src/matching/confidence.rs - Fuses relevance, string similarity and context into one confidence
use std::collections::HashSet;

use crate::matching::similarity::name_similarity;
use crate::models::{
    sort_by_confidence, CompanyContext, CompanyRecord, ConfidenceFactors, MatchCandidate,
    ScoredCandidate,
};
use crate::utils::matcher_config::ConfidenceWeights;

const CONTEXT_EQUAL: f64 = 1.0;
const CONTEXT_CONTAINED: f64 = 0.75;
const CONTEXT_SHARED_TOKEN: f64 = 0.5;

/// Pure scoring over a weight snapshot. No I/O.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    /// Weighted mean of the factors. Without supplied context the context weight is
    /// left out of both numerator and denominator, so a query that carries no hints
    /// is not capped at `1 - w_context`.
    pub fn combine(&self, factors: &ConfidenceFactors, context_supplied: bool) -> f64 {
        let w = self.weights;
        let mut numerator =
            w.relevance * factors.relevance + w.similarity * factors.string_similarity;
        let mut denominator = w.relevance + w.similarity;
        if context_supplied {
            numerator += w.context * factors.context_match;
            denominator += w.context;
        }
        if denominator <= 0.0 {
            return 0.0;
        }
        (numerator / denominator).clamp(0.0, 1.0)
    }

    /// Scores one candidate against the maximum raw relevance of its result set.
    pub fn score_candidate(
        &self,
        query: &str,
        candidate: MatchCandidate,
        max_relevance: f64,
        context: Option<&CompanyContext>,
    ) -> ScoredCandidate {
        let similarity = name_similarity(query, &candidate.record);
        let context = context.filter(|c| !c.is_empty());
        let factors = ConfidenceFactors {
            relevance: normalize_relevance(candidate.raw_relevance_score, max_relevance),
            string_similarity: similarity.score,
            context_match: context.map_or(0.0, |c| context_score(c, &candidate.record)),
        };
        ScoredCandidate {
            confidence: self.combine(&factors, context.is_some()),
            match_type: similarity.match_type(),
            factors,
            reasoning: None,
            record: candidate.record,
        }
    }

    /// Scores a whole result set, confidence-descending.
    pub fn score_all(
        &self,
        query: &str,
        candidates: Vec<MatchCandidate>,
        context: Option<&CompanyContext>,
    ) -> Vec<ScoredCandidate> {
        let max_relevance = candidates
            .iter()
            .map(|c| c.raw_relevance_score)
            .fold(0.0_f64, f64::max);
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|c| self.score_candidate(query, c, max_relevance, context))
            .collect();
        sort_by_confidence(&mut scored);
        scored
    }
}

/// Top two confidences within `threshold` of each other.
pub fn is_ambiguous(candidates: &[ScoredCandidate], threshold: f64) -> bool {
    match candidates {
        [first, second, ..] => (first.confidence - second.confidence).abs() <= threshold,
        _ => false,
    }
}

/// `ln(score + 1) / ln(max + 1)` clamped to [0, 1]; zero when the set has no positive score.
pub fn normalize_relevance(score: f64, max_score: f64) -> f64 {
    if !(max_score > 0.0) || !score.is_finite() {
        return 0.0;
    }
    let normalized = (score.max(0.0) + 1.0).ln() / (max_score + 1.0).ln();
    normalized.clamp(0.0, 1.0)
}

/// Mean agreement over the supplied context fields; fields the record does not carry
/// count as disagreement.
pub fn context_score(context: &CompanyContext, record: &CompanyRecord) -> f64 {
    let fields = context.supplied_fields();
    if fields.is_empty() {
        return 0.0;
    }
    let total: f64 = fields
        .iter()
        .map(|(field, wanted)| match record.attribute(field) {
            Some(known) => attribute_agreement(wanted, known),
            None => 0.0,
        })
        .sum();
    (total / fields.len() as f64).clamp(0.0, 1.0)
}

fn attribute_agreement(wanted: &str, known: &str) -> f64 {
    let wanted = wanted.trim().to_lowercase();
    let known = known.trim().to_lowercase();
    if wanted.is_empty() || known.is_empty() {
        return 0.0;
    }
    if wanted == known {
        return CONTEXT_EQUAL;
    }
    if wanted.contains(&known) || known.contains(&wanted) {
        return CONTEXT_CONTAINED;
    }
    let tokens = |s: &str| -> HashSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .map(str::to_string)
            .collect()
    };
    if !tokens(&wanted).is_disjoint(&tokens(&known)) {
        CONTEXT_SHARED_TOKEN
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchType;
    use proptest::prelude::*;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(ConfidenceWeights::default())
    }

    #[test]
    fn test_relevance_is_log_normalized() {
        assert_eq!(normalize_relevance(5.0, 0.0), 0.0);
        assert_eq!(normalize_relevance(10.0, 10.0), 1.0);
        let half = normalize_relevance(3.0, 15.0);
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(normalize_relevance(20.0, 10.0), 1.0);
    }

    #[test]
    fn test_context_score_levels() {
        let mut record = CompanyRecord::new("c1", "Acme");
        record.industry = Some("Industrial Manufacturing".to_string());
        record.region = Some("Europe".to_string());

        assert_eq!(context_score(&CompanyContext::industry("manufacturing"), &record), 0.75);

        let ctx = CompanyContext {
            industry: Some("industrial manufacturing".to_string()),
            region: Some("north america".to_string()),
            size: Some("large".to_string()),
        };
        assert!((context_score(&ctx, &record) - 1.0 / 3.0).abs() < 1e-9);

        record.industry = Some("Heavy Manufacturing Equipment".to_string());
        let ctx = CompanyContext::industry("precision manufacturing");
        assert_eq!(context_score(&ctx, &record), 0.5);
    }

    #[test]
    fn test_ibm_abbreviation_without_context() {
        let record = CompanyRecord::new("ibm", "International Business Machines Corporation");
        let scored = scorer().score_all(
            "IBM",
            vec![MatchCandidate {
                record,
                raw_relevance_score: 4.2,
            }],
            None,
        );
        let top = &scored[0];
        assert_eq!(top.match_type, MatchType::Abbreviation);
        assert_eq!(top.factors.relevance, 1.0);
        assert!((top.confidence - 0.725 / 0.8).abs() < 1e-9);
        assert!(top.confidence >= 0.9);
    }

    #[test]
    fn test_context_factor_only_counts_when_supplied() {
        let s = scorer();
        let factors = ConfidenceFactors {
            relevance: 1.0,
            string_similarity: 1.0,
            context_match: 0.0,
        };
        assert_eq!(s.combine(&factors, false), 1.0);
        assert!((s.combine(&factors, true) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_score_all_sorts_descending() {
        let candidates = vec![
            MatchCandidate {
                record: CompanyRecord::new("a", "Acme Rockets"),
                raw_relevance_score: 2.0,
            },
            MatchCandidate {
                record: CompanyRecord::new("b", "Acme Widgets Inc"),
                raw_relevance_score: 8.0,
            },
        ];
        let scored = scorer().score_all("Acme Widgets", candidates, None);
        assert_eq!(scored[0].record.id, "b");
        assert!(scored[0].confidence >= scored[1].confidence);
    }

    proptest! {
        #[test]
        fn proptest_confidence_is_monotonic(
            relevance in 0.0f64..=1.0,
            similarity in 0.0f64..=1.0,
            context in 0.0f64..=1.0,
            bump in 0.0f64..=1.0,
            with_context in any::<bool>(),
        ) {
            let s = scorer();
            let base = ConfidenceFactors { relevance, string_similarity: similarity, context_match: context };
            let c = s.combine(&base, with_context);
            prop_assert!((0.0..=1.0).contains(&c));

            let more_relevant = ConfidenceFactors { relevance: (relevance + bump).min(1.0), ..base };
            prop_assert!(s.combine(&more_relevant, with_context) + 1e-12 >= c);

            let more_similar = ConfidenceFactors { string_similarity: (similarity + bump).min(1.0), ..base };
            prop_assert!(s.combine(&more_similar, with_context) + 1e-12 >= c);
        }
    }
}
