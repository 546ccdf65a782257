// src/models/matching.rs
use serde::{Deserialize, Serialize};

use crate::models::core::{CompanyContext, CompanyRecord, MatchType};

/// A search hit for one matching call.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub record: CompanyRecord,
    pub raw_relevance_score: f64,
}

/// The three independently normalized signals fused into one confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceFactors {
    pub relevance: f64,
    pub string_similarity: f64,
    pub context_match: f64,
}

/// A candidate after confidence scoring (and possibly AI adjustment).
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub record: CompanyRecord,
    pub confidence: f64,
    pub match_type: MatchType,
    pub factors: ConfidenceFactors,
    pub reasoning: Option<String>,
}

impl ScoredCandidate {
    pub fn to_detail(&self) -> MatchDetail {
        MatchDetail {
            id: self.record.id.clone(),
            name: self.record.name().to_string(),
            confidence: self.confidence,
            match_type: self.match_type,
            reasoning: self.reasoning.clone(),
        }
    }
}

/// Sorts confidence-descending; ties keep their incoming order.
pub fn sort_by_confidence(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOptions {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub company_name: String,
    #[serde(default)]
    pub context: Option<CompanyContext>,
    #[serde(default)]
    pub options: MatchOptions,
}

impl MatchRequest {
    pub fn new(company_name: &str) -> Self {
        Self {
            company_name: company_name.to_string(),
            context: None,
            options: MatchOptions::default(),
        }
    }

    pub fn with_context(mut self, context: CompanyContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.options.skip_cache = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetail {
    pub id: String,
    pub name: String,
    pub confidence: f64,
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Exactly one outcome shape per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResponse {
    Match {
        #[serde(rename = "match")]
        matched: MatchDetail,
    },
    PotentialMatches {
        #[serde(rename = "potentialMatches")]
        potential_matches: Vec<MatchDetail>,
    },
    NoMatch {
        message: String,
    },
}

impl MatchResponse {
    pub fn no_match(message: impl Into<String>) -> Self {
        MatchResponse::NoMatch {
            message: message.into(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            MatchResponse::Match { .. } => "match",
            MatchResponse::PotentialMatches { .. } => "potential_matches",
            MatchResponse::NoMatch { .. } => "no_match",
        }
    }

    pub fn as_match(&self) -> Option<&MatchDetail> {
        match self {
            MatchResponse::Match { matched } => Some(matched),
            _ => None,
        }
    }

    /// Highest confidence carried by the response, 0 for `NoMatch`.
    pub fn best_confidence(&self) -> f64 {
        match self {
            MatchResponse::Match { matched } => matched.confidence,
            MatchResponse::PotentialMatches { potential_matches } => potential_matches
                .iter()
                .map(|m| m.confidence)
                .fold(0.0, f64::max),
            MatchResponse::NoMatch { .. } => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail(id: &str, confidence: f64) -> MatchDetail {
        MatchDetail {
            id: id.to_string(),
            name: format!("Company {}", id),
            confidence,
            match_type: MatchType::Fuzzy,
            reasoning: None,
        }
    }

    #[test]
    fn test_response_wire_shapes() {
        let matched = MatchResponse::Match {
            matched: detail("c1", 0.97),
        };
        let value = serde_json::to_value(&matched).unwrap();
        assert_eq!(value["status"], "match");
        assert_eq!(value["match"]["matchType"], "fuzzy");
        assert!(value["match"].get("reasoning").is_none());

        let potentials = MatchResponse::PotentialMatches {
            potential_matches: vec![detail("c1", 0.6), detail("c2", 0.4)],
        };
        let value = serde_json::to_value(&potentials).unwrap();
        assert_eq!(value["status"], "potential_matches");
        assert_eq!(value["potentialMatches"].as_array().unwrap().len(), 2);

        let none = MatchResponse::no_match("nothing");
        assert_eq!(
            serde_json::to_value(&none).unwrap(),
            json!({"status": "no_match", "message": "nothing"})
        );
    }

    #[test]
    fn test_request_parses_camel_case() {
        let request: MatchRequest = serde_json::from_value(json!({
            "companyName": "Acme",
            "context": {"industry": "manufacturing"},
            "options": {"skipCache": true, "model": "llama3.1"}
        }))
        .unwrap();
        assert_eq!(request.company_name, "Acme");
        assert!(request.options.skip_cache);
        assert!(!request.options.debug);
        assert_eq!(request.context.unwrap().industry.as_deref(), Some("manufacturing"));
    }

    #[test]
    fn test_best_confidence() {
        let potentials = MatchResponse::PotentialMatches {
            potential_matches: vec![detail("a", 0.5), detail("b", 0.75)],
        };
        assert_eq!(potentials.best_confidence(), 0.75);
        assert_eq!(MatchResponse::no_match("x").best_confidence(), 0.0);
    }
}
