// src/matching/escalation.rs - Fallback strategies tried in order when a search comes back weak
use crate::ai::types::confident_suggestions;
use crate::errors::MatchError;
use crate::matching::normalize::{
    correct_common_typos, detect_subsidiary_parents, generate_query_variants, history_key,
    split_historical_name,
};
use crate::matching::orchestrator::{MatchOrchestrator, MatchSession};
use crate::models::{MatchResponse, MatchType};

const QUERY_VARIANT_LIMIT: usize = 3;
const TYPO_VARIATION_LIMIT: usize = 3;
const ALTERNATE_NAME_LIMIT: usize = 3;
const MIN_TYPO_CONFIDENCE: f64 = 0.6;
const MIN_RELATIONSHIP_CONFIDENCE: f64 = 0.7;
const MIN_ABBREVIATION_GUESS_CONFIDENCE: f64 = 0.7;
const MIN_SMART_QUERY_CONFIDENCE: f64 = 0.6;
const MAX_ABBREVIATION_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    TypoCorrection,
    QueryVariants,
    CorporateStructure,
    HistoricalName,
    AbbreviationGuess,
    SmartQueries,
}

pub const ESCALATION_ORDER: [EscalationStep; 6] = [
    EscalationStep::TypoCorrection,
    EscalationStep::QueryVariants,
    EscalationStep::CorporateStructure,
    EscalationStep::HistoricalName,
    EscalationStep::AbbreviationGuess,
    EscalationStep::SmartQueries,
];

impl EscalationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStep::TypoCorrection => "typo_correction",
            EscalationStep::QueryVariants => "query_variants",
            EscalationStep::CorporateStructure => "corporate_structure",
            EscalationStep::HistoricalName => "historical_name",
            EscalationStep::AbbreviationGuess => "abbreviation_guess",
            EscalationStep::SmartQueries => "smart_queries",
        }
    }
}

/// Rewrites an accepted recursive match so it reads as an answer to the original query.
fn annotate(
    response: MatchResponse,
    match_type: Option<MatchType>,
    reasoning: String,
) -> MatchResponse {
    match response {
        MatchResponse::Match { mut matched } => {
            if let Some(match_type) = match_type {
                matched.match_type = match_type;
            }
            matched.reasoning = Some(match matched.reasoning.take() {
                Some(inner) if !inner.trim().is_empty() => format!("{}; {}", reasoning, inner),
                _ => reasoning,
            });
            MatchResponse::Match { matched }
        }
        other => other,
    }
}

/// Drops blanks and repeats of the query itself, keeping first occurrences.
fn distinct_alternatives(query: &str, names: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    seen.insert(history_key(query));
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(history_key(n)))
        .take(limit)
        .collect()
}

impl MatchOrchestrator {
    /// Runs the escalation ladder for a depth-0 query. `Some` only for an accepted match.
    pub(crate) async fn escalate(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        for step in ESCALATION_ORDER {
            let accepted = match step {
                EscalationStep::TypoCorrection => self.try_typo_correction(session, query).await?,
                EscalationStep::QueryVariants => self.try_query_variants(session, query).await?,
                EscalationStep::CorporateStructure => {
                    self.try_corporate_structure(session, query).await?
                }
                EscalationStep::HistoricalName => self.try_historical_name(session, query).await?,
                EscalationStep::AbbreviationGuess => {
                    self.try_abbreviation_guess(session, query).await?
                }
                EscalationStep::SmartQueries => self.try_smart_queries(session, query).await?,
            };
            self.record_escalation(accepted.is_some());
            session.logger.log_escalation(step.as_str(), accepted.is_some());
            if accepted.is_some() {
                session.note(0, "escalation", format!("{} accepted", step.as_str()));
                return Ok(accepted);
            }
        }
        Ok(None)
    }

    /// First alternative whose recursive attempt comes back as a `Match`.
    async fn first_match(
        &self,
        session: &mut MatchSession,
        alternatives: Vec<String>,
    ) -> Result<Option<(String, MatchResponse)>, MatchError> {
        for alternative in alternatives {
            let response = self
                .match_at_depth(session, alternative.clone(), 1)
                .await?;
            if response.as_match().is_some() {
                return Ok(Some((alternative, response)));
            }
        }
        Ok(None)
    }

    async fn try_typo_correction(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        let mut alternatives: Vec<String> = correct_common_typos(query).into_iter().collect();
        if let Some(gateway) = &self.gateway {
            let service = gateway.service();
            let detected = gateway
                .call("detect_typo", service.detect_typo(query, &session.reasoning))
                .await;
            let detected = detected.filter(|t| t.is_typo && t.confidence >= MIN_TYPO_CONFIDENCE);
            if let Some(typo) = detected {
                alternatives.extend(typo.corrected_name);
            }
            let variations = gateway
                .call(
                    "generate_typo_variations",
                    service.generate_typo_variations(query, &session.reasoning),
                )
                .await;
            if let Some(variations) = variations {
                alternatives.extend(variations.variations.into_iter().take(TYPO_VARIATION_LIMIT));
            }
        }
        let alternatives = distinct_alternatives(query, alternatives, usize::MAX);
        if alternatives.is_empty() {
            return Ok(None);
        }
        session.note(0, "typo correction", alternatives.join(" | "));
        Ok(self
            .first_match(session, alternatives)
            .await?
            .map(|(corrected, response)| {
                annotate(
                    response,
                    Some(MatchType::Variation),
                    format!("Matched after correcting '{}' to '{}'", query, corrected),
                )
            }))
    }

    async fn try_query_variants(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        let variants = generate_query_variants(query, QUERY_VARIANT_LIMIT);
        if variants.is_empty() {
            return Ok(None);
        }
        session.note(0, "query variants", variants.join(" | "));
        Ok(self
            .first_match(session, variants)
            .await?
            .map(|(variant, response)| {
                annotate(response, None, format!("Matched via query variant '{}'", variant))
            }))
    }

    /// Parent names come from subsidiary phrasing, or from the reasoning service when
    /// the phrasing gives none. A matched parent is only accepted once the reasoning
    /// service confirms the relationship.
    async fn try_corporate_structure(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        let gateway = match &self.gateway {
            Some(gateway) => gateway.clone(),
            None => return Ok(None),
        };
        let service = gateway.service();
        let mut parents = detect_subsidiary_parents(query);
        if parents.is_empty() {
            let structure = gateway
                .call(
                    "detect_corporate_structure",
                    service.detect_corporate_structure(query, &session.reasoning),
                )
                .await;
            if let Some(structure) = structure.filter(|s| s.is_subsidiary) {
                parents = structure.parent_candidates;
            }
        }
        let parents = distinct_alternatives(query, parents, ALTERNATE_NAME_LIMIT);
        if parents.is_empty() {
            return Ok(None);
        }
        session.note(0, "corporate structure", parents.join(" | "));

        for parent in parents {
            let response = self.match_at_depth(session, parent.clone(), 1).await?;
            let Some(matched) = response.as_match() else {
                continue;
            };
            let confirmation = gateway
                .call(
                    "identify_parent_company",
                    service.identify_parent_company(query, &matched.name, &session.reasoning),
                )
                .await;
            match confirmation {
                Some(c) if c.is_subsidiary && c.confidence >= MIN_RELATIONSHIP_CONFIDENCE => {
                    let reasoning = if c.reasoning.trim().is_empty() {
                        format!("'{}' is a subsidiary of '{}'", query, matched.name)
                    } else {
                        format!("'{}' is a subsidiary of '{}': {}", query, matched.name, c.reasoning)
                    };
                    return Ok(Some(annotate(response, Some(MatchType::Semantic), reasoning)));
                }
                _ => session.note(
                    0,
                    "corporate structure",
                    format!("parent '{}' not confirmed", matched.name),
                ),
            }
        }
        Ok(None)
    }

    /// Explicit "formerly"/"now" markers are trusted as written; otherwise the
    /// reasoning service proposes current names and must confirm the link.
    async fn try_historical_name(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        if let Some(split) = split_historical_name(query) {
            let names = distinct_alternatives(
                query,
                vec![split.current.clone(), split.former.clone()],
                2,
            );
            session.note(0, "historical name", format!("explicit: {}", names.join(" | ")));
            return Ok(self
                .first_match(session, names)
                .await?
                .map(|(name, response)| {
                    annotate(
                        response,
                        Some(MatchType::Semantic),
                        format!(
                            "'{}' names '{}' (current) and '{}' (former); matched on '{}'",
                            query, split.current, split.former, name
                        ),
                    )
                }));
        }

        let gateway = match &self.gateway {
            Some(gateway) => gateway.clone(),
            None => return Ok(None),
        };
        let service = gateway.service();
        let detection = gateway
            .call(
                "detect_historical_name",
                service.detect_historical_name(query, &session.reasoning),
            )
            .await;
        let current_names = match detection.filter(|d| d.is_historical) {
            Some(d) => distinct_alternatives(query, d.current_names, ALTERNATE_NAME_LIMIT),
            None => return Ok(None),
        };
        if current_names.is_empty() {
            return Ok(None);
        }
        session.note(0, "historical name", current_names.join(" | "));

        for current in current_names {
            let response = self.match_at_depth(session, current.clone(), 1).await?;
            let Some(matched) = response.as_match() else {
                continue;
            };
            let check = gateway
                .call(
                    "detect_historical_company",
                    service.detect_historical_company(query, &matched.name, &session.reasoning),
                )
                .await;
            let confirmed = check
                .filter(|c| c.is_same_company && c.confidence >= MIN_RELATIONSHIP_CONFIDENCE);
            if let Some(c) = confirmed {
                let reasoning = if c.reasoning.trim().is_empty() {
                    format!("'{}' is a former name of '{}'", query, matched.name)
                } else {
                    format!("'{}' is a former name of '{}': {}", query, matched.name, c.reasoning)
                };
                return Ok(Some(annotate(response, Some(MatchType::Semantic), reasoning)));
            }
        }
        Ok(None)
    }

    async fn try_abbreviation_guess(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        let compact_len = query.chars().filter(|c| c.is_alphanumeric()).count();
        if compact_len == 0 || compact_len > MAX_ABBREVIATION_LEN {
            return Ok(None);
        }
        let Some(gateway) = self.gateway.clone() else {
            return Ok(None);
        };
        let guesses = gateway
            .call(
                "guess_from_abbreviation",
                gateway.service().guess_from_abbreviation(
                    query,
                    session.context.as_ref(),
                    &session.reasoning,
                ),
            )
            .await;
        let Some(guesses) = guesses else {
            return Ok(None);
        };
        let kept = confident_suggestions(
            &guesses.guesses,
            MIN_ABBREVIATION_GUESS_CONFIDENCE,
            ALTERNATE_NAME_LIMIT,
        );
        if kept.is_empty() {
            session.note(0, "abbreviation guess", "no confident expansion".to_string());
            return Ok(None);
        }
        let names = distinct_alternatives(
            query,
            kept.into_iter().map(|g| g.name).collect(),
            ALTERNATE_NAME_LIMIT,
        );
        session.note(0, "abbreviation guess", names.join(" | "));
        Ok(self
            .first_match(session, names)
            .await?
            .map(|(expansion, response)| {
                annotate(
                    response,
                    Some(MatchType::Abbreviation),
                    format!("'{}' read as an abbreviation of '{}'", query, expansion),
                )
            }))
    }

    async fn try_smart_queries(
        &self,
        session: &mut MatchSession,
        query: &str,
    ) -> Result<Option<MatchResponse>, MatchError> {
        let Some(gateway) = self.gateway.clone() else {
            return Ok(None);
        };
        let generated = gateway
            .call(
                "generate_smart_queries",
                gateway.service().generate_smart_queries(
                    query,
                    session.context.as_ref(),
                    &session.reasoning,
                ),
            )
            .await;
        let Some(generated) = generated else {
            return Ok(None);
        };
        let names: Vec<String> = confident_suggestions(
            &generated.queries,
            MIN_SMART_QUERY_CONFIDENCE,
            ALTERNATE_NAME_LIMIT,
        )
        .into_iter()
        .map(|s| s.name)
        .collect();
        if names.is_empty() {
            return Ok(None);
        }
        session.note(0, "smart queries", names.join(" | "));
        Ok(self
            .first_match(session, names)
            .await?
            .map(|(generated, response)| {
                annotate(
                    response,
                    Some(MatchType::Semantic),
                    format!("Matched via generated query '{}'", generated),
                )
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{
        AbbreviationGuesses, CorporateStructure, HistoricalCompanyCheck, HistoricalNameDetection,
        NameSuggestion, ParentIdentification,
    };
    use crate::matching::search::SearchIndex;
    use crate::models::{CompanyRecord, MatchRequest};
    use crate::registry::InMemoryRegistry;
    use crate::test_support::{CountingIndex, ScriptedReasoning};
    use crate::utils::matcher_config::MatcherConfig;
    use std::sync::Arc;

    fn orchestrator(records: Vec<CompanyRecord>) -> MatchOrchestrator {
        let index: Arc<dyn SearchIndex> = Arc::new(InMemoryRegistry::new(records));
        MatchOrchestrator::new(index, MatcherConfig::default()).unwrap()
    }

    #[test]
    fn test_annotate_only_touches_matches() {
        let none = MatchResponse::no_match("nothing");
        assert_eq!(annotate(none.clone(), Some(MatchType::Semantic), "x".into()), none);
    }

    #[test]
    fn test_distinct_alternatives_drop_query_and_repeats() {
        let names = vec![
            "Acme".to_string(),
            " acme  corp ".to_string(),
            "Acme Corp".to_string(),
            "".to_string(),
            "Acme Group".to_string(),
        ];
        assert_eq!(
            distinct_alternatives("ACME", names, 5),
            vec!["acme  corp".to_string(), "Acme Group".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unconfident_abbreviation_guess_ends_in_no_match() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_abbreviation_guesses(AbbreviationGuesses {
            guesses: vec![NameSuggestion {
                name: "Xylophone Zebra Yachts".into(),
                confidence: 0.5,
            }],
        });
        let o = orchestrator(vec![
            CompanyRecord::new("acme", "Acme Widgets Inc"),
            CompanyRecord::new("xzy", "Xylophone Zebra Yachts Ltd"),
        ])
        .with_reasoning(scripted.clone(), None);

        let response = o.resolve(MatchRequest::new("XYZ")).await.unwrap();
        assert_eq!(response.status(), "no_match");
        assert!(scripted.calls().contains(&"guess_from_abbreviation".to_string()));
        assert_eq!(o.stats().escalations_accepted, 0);
    }

    #[tokio::test]
    async fn test_confident_abbreviation_guess_is_accepted() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_abbreviation_guesses(AbbreviationGuesses {
            guesses: vec![
                NameSuggestion { name: "Xylophone Zebra Yachts".into(), confidence: 0.8 },
                NameSuggestion { name: "Xenon Yard Zone".into(), confidence: 0.3 },
            ],
        });
        let o = orchestrator(vec![CompanyRecord::new("xzy", "Xylophone Zebra Yachts Ltd")])
            .with_reasoning(scripted, None);

        let response = o.resolve(MatchRequest::new("XYZ")).await.unwrap();
        let matched = response.as_match().expect("expansion should match");
        assert_eq!(matched.id, "xzy");
        assert_eq!(matched.match_type, MatchType::Abbreviation);
        assert!(matched
            .reasoning
            .as_deref()
            .unwrap()
            .contains("abbreviation of 'Xylophone Zebra Yachts'"));
        assert_eq!(o.stats().escalations_accepted, 1);
    }

    #[tokio::test]
    async fn test_explicit_historical_marker_without_reasoning_service() {
        let o = orchestrator(vec![CompanyRecord::new("meta", "Meta Platforms Inc")]);
        let response = o
            .resolve(MatchRequest::new("Facebook (now Meta Platforms)"))
            .await
            .unwrap();
        let matched = response.as_match().expect("current name should match");
        assert_eq!(matched.id, "meta");
        assert_eq!(matched.match_type, MatchType::Semantic);
        assert!(matched.reasoning.as_deref().unwrap().contains("'Facebook' (former)"));
    }

    #[tokio::test]
    async fn test_corporate_parent_requires_confirmation() {
        let records = vec![CompanyRecord::new("alphabet", "Alphabet Inc")];
        let query = "Waymo, a subsidiary of Alphabet Inc";

        let unconfirmed = Arc::new(ScriptedReasoning::new());
        unconfirmed.set_parent_identification(ParentIdentification {
            is_subsidiary: true,
            confidence: 0.5,
            reasoning: String::new(),
        });
        let o = orchestrator(records.clone()).with_reasoning(unconfirmed, None);
        let response = o.resolve(MatchRequest::new(query).skip_cache()).await.unwrap();
        assert!(response.as_match().is_none());

        let confirmed = Arc::new(ScriptedReasoning::new());
        confirmed.set_parent_identification(ParentIdentification {
            is_subsidiary: true,
            confidence: 0.9,
            reasoning: "Waymo is owned by Alphabet".into(),
        });
        let o = orchestrator(records).with_reasoning(confirmed.clone(), None);
        let response = o.resolve(MatchRequest::new(query).skip_cache()).await.unwrap();
        let matched = response.as_match().expect("confirmed parent should match");
        assert_eq!(matched.id, "alphabet");
        assert_eq!(matched.match_type, MatchType::Semantic);
        assert!(matched.reasoning.as_deref().unwrap().contains("owned by Alphabet"));
        assert!(!confirmed
            .calls()
            .contains(&"detect_corporate_structure".to_string()));
    }

    #[tokio::test]
    async fn test_typo_dictionary_correction_is_searched_next() {
        let counting = Arc::new(CountingIndex::new(Arc::new(InMemoryRegistry::new(vec![
            CompanyRecord::new("acme", "Acme Technologies"),
        ]))));
        let o = MatchOrchestrator::new(counting.clone(), MatcherConfig::default()).unwrap();
        let (_, trace) = o
            .resolve_traced(MatchRequest::new("Acmee Tecnologies Zq"))
            .await
            .unwrap();
        assert!(trace.searched.len() >= 2);
        assert_eq!(trace.searched[1], "Acmee Technologies Zq");
        assert_eq!(counting.searched(), trace.searched);
    }

    #[tokio::test]
    async fn test_reasoned_parent_candidates_when_phrasing_gives_none() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_corporate_structure(CorporateStructure {
            is_subsidiary: true,
            parent_candidates: vec!["Northwind Analytics".into()],
            confidence: 0.8,
            reasoning: String::new(),
        });
        scripted.set_parent_identification(ParentIdentification {
            is_subsidiary: true,
            confidence: 0.85,
            reasoning: String::new(),
        });
        let o = orchestrator(vec![CompanyRecord::new("nw", "Northwind Analytics Corp")])
            .with_reasoning(scripted.clone(), None);

        let response = o.resolve(MatchRequest::new("Quantel Systems")).await.unwrap();
        let matched = response.as_match().expect("reasoned parent should match");
        assert_eq!(matched.id, "nw");
        assert_eq!(matched.match_type, MatchType::Semantic);
        assert!(matched
            .reasoning
            .as_deref()
            .unwrap()
            .starts_with("'Quantel Systems' is a subsidiary of 'Northwind Analytics Corp'"));
        assert!(scripted
            .calls()
            .contains(&"detect_corporate_structure".to_string()));
    }

    #[tokio::test]
    async fn test_reasoned_former_name_needs_same_company_check() {
        let records = vec![CompanyRecord::new("nw", "Northwind Analytics Corp")];
        let detection = HistoricalNameDetection {
            is_historical: true,
            current_names: vec!["Northwind Analytics".into()],
            confidence: 0.8,
            reasoning: String::new(),
        };

        let doubtful = Arc::new(ScriptedReasoning::new());
        doubtful.set_historical(detection.clone());
        doubtful.set_historical_check(HistoricalCompanyCheck {
            is_same_company: false,
            confidence: 0.9,
            reasoning: String::new(),
        });
        let o = orchestrator(records.clone()).with_reasoning(doubtful, None);
        let response = o.resolve(MatchRequest::new("Quantel Systems")).await.unwrap();
        assert!(response.as_match().is_none());

        let sure = Arc::new(ScriptedReasoning::new());
        sure.set_historical(detection);
        sure.set_historical_check(HistoricalCompanyCheck {
            is_same_company: true,
            confidence: 0.9,
            reasoning: "renamed in 2019".into(),
        });
        let o = orchestrator(records).with_reasoning(sure, None);
        let response = o.resolve(MatchRequest::new("Quantel Systems")).await.unwrap();
        let matched = response.as_match().expect("confirmed former name should match");
        assert_eq!(matched.id, "nw");
        assert_eq!(matched.match_type, MatchType::Semantic);
        assert!(matched.reasoning.as_deref().unwrap().contains("former name"));
        assert!(matched.reasoning.as_deref().unwrap().contains("renamed in 2019"));
    }
}
