// src/matching/formatter.rs - Maps scored candidates to the response variants
use crate::cache::CacheLookup;
use crate::matching::confidence::is_ambiguous;
use crate::models::{MatchDetail, MatchResponse, ScoredCandidate};
use crate::utils::matcher_config::MatcherConfig;

pub const MAX_POTENTIAL_MATCHES: usize = 5;
/// A response whose best candidate is below this may be retried with a suggested name.
pub const WEAK_RESPONSE_CEILING: f64 = 0.7;
/// A retry replaces the original only with a match or a potential match at least this good.
pub const RETRY_IMPROVEMENT_FLOOR: f64 = 0.8;

pub const NO_MATCH_MESSAGE: &str = "No matching company found";

/// Candidates must already be confidence-sorted. A top candidate tied with the runner-up
/// is never reported as a definitive match.
pub fn format_response(candidates: &[ScoredCandidate], config: &MatcherConfig) -> MatchResponse {
    let tied = is_ambiguous(candidates, config.ambiguity_threshold);
    match candidates.first() {
        Some(top) if top.confidence >= config.match_threshold && !tied => MatchResponse::Match {
            matched: top.to_detail(),
        },
        _ => {
            let potential: Vec<MatchDetail> = candidates
                .iter()
                .filter(|c| c.confidence >= config.low_confidence_threshold)
                .take(MAX_POTENTIAL_MATCHES)
                .map(ScoredCandidate::to_detail)
                .collect();
            if potential.is_empty() {
                MatchResponse::no_match(NO_MATCH_MESSAGE)
            } else {
                MatchResponse::PotentialMatches {
                    potential_matches: potential,
                }
            }
        }
    }
}

/// A cache hit is returned as stored; nothing is re-scored.
pub fn cache_hit_response(lookup: &CacheLookup) -> Option<MatchResponse> {
    let record = lookup.record.as_ref()?;
    let entry = lookup.entry.as_ref()?;
    Some(MatchResponse::Match {
        matched: MatchDetail {
            id: record.id.clone(),
            name: record.name().to_string(),
            confidence: entry.confidence,
            match_type: entry.match_type,
            reasoning: Some(format!(
                "Exact-match cache hit for '{}' (matched {} time{}, last {})",
                entry.query,
                entry.match_count,
                if entry.match_count == 1 { "" } else { "s" },
                entry.last_matched_at.format("%Y-%m-%d %H:%M UTC")
            )),
        },
    })
}

/// No match, or only potential matches below `WEAK_RESPONSE_CEILING`.
pub fn is_weak(response: &MatchResponse) -> bool {
    match response {
        MatchResponse::Match { .. } => false,
        MatchResponse::PotentialMatches { potential_matches } => potential_matches
            .iter()
            .all(|m| m.confidence < WEAK_RESPONSE_CEILING),
        MatchResponse::NoMatch { .. } => true,
    }
}

pub fn improves_on_weak(response: &MatchResponse) -> bool {
    match response {
        MatchResponse::Match { .. } => true,
        MatchResponse::PotentialMatches { potential_matches } => potential_matches
            .iter()
            .any(|m| m.confidence >= RETRY_IMPROVEMENT_FLOOR),
        MatchResponse::NoMatch { .. } => false,
    }
}
