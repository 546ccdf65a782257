// src/ai/enhancer.rs - Reasoning-assisted refinement of medium-confidence result sets
use log::debug;
use std::collections::HashSet;

use crate::ai::gateway::ReasoningGateway;
use crate::ai::types::{unit, CandidateSummary, ReasoningOptions};
use crate::matching::confidence::is_ambiguous;
use crate::models::{sort_by_confidence, CompanyContext, MatchType, ScoredCandidate};
use crate::utils::matcher_config::MatcherConfig;

const VALIDATE_TOP_N: usize = 3;
const DISAMBIGUATE_MAX: usize = 5;
const BATCH_MAX: usize = 10;
const SHORT_QUERY_LEN: usize = 5;
/// Below this AI confidence, a non-match's suggested names are queued for a later search.
const SUGGESTION_CONFIDENCE_CEILING: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementStrategy {
    Skip,
    /// Top confidence in the uncertain band: validate the top three one by one.
    ValidateTop,
    /// Context supplied and several close candidates: one disambiguation call.
    Disambiguate,
    /// Many weak candidates without usable context: one batch re-score.
    BatchRescore,
}

impl EnhancementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancementStrategy::Skip => "skip",
            EnhancementStrategy::ValidateTop => "validate_top",
            EnhancementStrategy::Disambiguate => "disambiguate",
            EnhancementStrategy::BatchRescore => "batch_rescore",
        }
    }
}

/// Chooses how the reasoning service is used for a confidence-sorted result set.
pub fn select_strategy(
    candidates: &[ScoredCandidate],
    context: Option<&CompanyContext>,
    config: &MatcherConfig,
) -> EnhancementStrategy {
    let top = match candidates.first() {
        Some(top) => top.confidence,
        None => return EnhancementStrategy::Skip,
    };
    if top >= config.high_confidence_threshold {
        return EnhancementStrategy::Skip;
    }
    if top >= config.ai_band_min && top < config.ai_band_max {
        return EnhancementStrategy::ValidateTop;
    }
    let ambiguous = is_ambiguous(candidates, config.ambiguity_threshold);
    let has_context = context.map_or(false, |c| !c.is_empty());
    let weak = top < config.ai_band_min;
    if has_context && candidates.len() >= 2 && (ambiguous || weak) {
        return EnhancementStrategy::Disambiguate;
    }
    if weak || ambiguous {
        return EnhancementStrategy::BatchRescore;
    }
    EnhancementStrategy::Skip
}

#[derive(Debug, Clone)]
pub struct Enhancement {
    pub strategy: EnhancementStrategy,
    pub candidates: Vec<ScoredCandidate>,
    /// Alternate company names the reasoning service proposed, for a later search.
    pub suggestions: Vec<String>,
}

pub struct Enhancer<'a> {
    gateway: &'a ReasoningGateway,
    config: &'a MatcherConfig,
    options: &'a ReasoningOptions,
}

impl<'a> Enhancer<'a> {
    pub fn new(
        gateway: &'a ReasoningGateway,
        config: &'a MatcherConfig,
        options: &'a ReasoningOptions,
    ) -> Self {
        Self {
            gateway,
            config,
            options,
        }
    }

    pub async fn enhance(
        &self,
        query: &str,
        candidates: Vec<ScoredCandidate>,
        context: Option<&CompanyContext>,
    ) -> Enhancement {
        let strategy = select_strategy(&candidates, context, self.config);
        debug!(
            "Enhancer strategy for '{}' over {} candidates: {}",
            query,
            candidates.len(),
            strategy.as_str()
        );
        let (candidates, suggestions) = match (strategy, context) {
            (EnhancementStrategy::ValidateTop, _) => {
                self.validate_top(query, candidates, context).await
            }
            (EnhancementStrategy::Disambiguate, Some(ctx)) => {
                (self.disambiguate(query, candidates, ctx).await, Vec::new())
            }
            (EnhancementStrategy::BatchRescore, _) => {
                (self.batch_rescore(query, candidates).await, Vec::new())
            }
            _ => (candidates, Vec::new()),
        };
        Enhancement {
            strategy,
            candidates,
            suggestions,
        }
    }

    async fn validate_top(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
        context: Option<&CompanyContext>,
    ) -> (Vec<ScoredCandidate>, Vec<String>) {
        let service = self.gateway.service();
        let blend = self.config.validation_blend;
        let short_query = query.chars().filter(|c| c.is_alphanumeric()).count() <= SHORT_QUERY_LEN;
        let mut suggestions = Vec::new();
        let mut seen = HashSet::new();

        for (index, candidate) in candidates.iter_mut().take(VALIDATE_TOP_N).enumerate() {
            if short_query {
                let check = self
                    .gateway
                    .call(
                        "check_abbreviation",
                        service.check_abbreviation(query, candidate.record.name(), self.options),
                    )
                    .await;
                if let Some(check) = check.filter(|c| c.is_abbreviation) {
                    candidate.confidence = blend.blend(candidate.confidence, unit(check.confidence));
                    candidate.match_type = MatchType::Abbreviation;
                    candidate.reasoning = Some(non_empty_or(
                        check.reasoning,
                        format!("'{}' abbreviates '{}'", query, candidate.record.name()),
                    ));
                    continue;
                }
            }

            let summary = CandidateSummary::from_scored(index, candidate);
            let evaluation = self
                .gateway
                .call(
                    "evaluate_match",
                    service.evaluate_match(query, &summary, context, self.options),
                )
                .await;
            let Some(evaluation) = evaluation else {
                continue;
            };
            let ai_confidence = unit(evaluation.confidence);
            candidate.confidence = blend.blend(candidate.confidence, ai_confidence);
            if evaluation.is_match {
                if matches!(candidate.match_type, MatchType::Fuzzy | MatchType::Variation) {
                    candidate.match_type = MatchType::Semantic;
                }
            } else if ai_confidence < SUGGESTION_CONFIDENCE_CEILING {
                for name in evaluation.suggested_names {
                    let trimmed = name.trim();
                    if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
                        suggestions.push(trimmed.to_string());
                    }
                }
            }
            if !evaluation.reasoning.is_empty() {
                candidate.reasoning = Some(evaluation.reasoning);
            }
        }
        sort_by_confidence(&mut candidates);
        (candidates, suggestions)
    }

    async fn disambiguate(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
        context: &CompanyContext,
    ) -> Vec<ScoredCandidate> {
        let summaries: Vec<CandidateSummary> = candidates
            .iter()
            .take(DISAMBIGUATE_MAX)
            .enumerate()
            .map(|(i, c)| CandidateSummary::from_scored(i, c))
            .collect();
        let decision = self
            .gateway
            .call(
                "disambiguate",
                self.gateway
                    .service()
                    .disambiguate(query, &summaries, context, self.options),
            )
            .await;
        let Some(decision) = decision else {
            return candidates;
        };
        match decision.best_index.filter(|&i| i < summaries.len()) {
            Some(best) => {
                let chosen = &mut candidates[best];
                chosen.confidence = self
                    .config
                    .disambiguation_blend
                    .blend(chosen.confidence, unit(decision.confidence));
                chosen.match_type = MatchType::Semantic;
                chosen.reasoning = Some(non_empty_or(
                    decision.reasoning,
                    "selected by context disambiguation".to_string(),
                ));
                sort_by_confidence(&mut candidates);
            }
            None => debug!("Disambiguation for '{}' picked no candidate", query),
        }
        candidates
    }

    async fn batch_rescore(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
    ) -> Vec<ScoredCandidate> {
        let summaries: Vec<CandidateSummary> = candidates
            .iter()
            .take(BATCH_MAX)
            .enumerate()
            .map(|(i, c)| CandidateSummary::from_scored(i, c))
            .collect();
        let evaluation = self
            .gateway
            .call(
                "batch_evaluate",
                self.gateway
                    .service()
                    .batch_evaluate(query, &summaries, self.options),
            )
            .await;
        let Some(evaluation) = evaluation else {
            return candidates;
        };
        let blend = self.config.validation_blend;
        let mut rescored = HashSet::new();
        for score in evaluation.scores {
            if score.index >= summaries.len() || !rescored.insert(score.index) {
                continue;
            }
            let candidate = &mut candidates[score.index];
            candidate.confidence = blend.blend(candidate.confidence, unit(score.confidence));
            if !score.reasoning.is_empty() {
                candidate.reasoning = Some(score.reasoning);
            }
        }
        candidates.truncate(BATCH_MAX);
        candidates.retain(|c| c.confidence >= self.config.low_confidence_threshold);
        sort_by_confidence(&mut candidates);
        candidates
    }
}

fn non_empty_or(text: String, fallback: String) -> String {
    if text.trim().is_empty() {
        fallback
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{
        AbbreviationCheck, BatchEvaluation, BatchScore, Disambiguation, MatchEvaluation,
    };
    use crate::models::{CompanyRecord, ConfidenceFactors};
    use crate::test_support::ScriptedReasoning;
    use std::sync::Arc;
    use std::time::Duration;

    fn scored(id: &str, name: &str, confidence: f64) -> ScoredCandidate {
        ScoredCandidate {
            record: CompanyRecord::new(id, name),
            confidence,
            match_type: MatchType::Fuzzy,
            factors: ConfidenceFactors::default(),
            reasoning: None,
        }
    }

    fn gateway(scripted: &Arc<ScriptedReasoning>) -> ReasoningGateway {
        ReasoningGateway::new(scripted.clone(), None, Duration::from_secs(1))
    }

    #[test]
    fn test_strategy_selection() {
        let config = MatcherConfig::default();
        let manufacturing = CompanyContext::industry("manufacturing");

        assert_eq!(select_strategy(&[], None, &config), EnhancementStrategy::Skip);
        assert_eq!(
            select_strategy(&[scored("a", "A", 0.97)], None, &config),
            EnhancementStrategy::Skip
        );
        assert_eq!(
            select_strategy(&[scored("a", "A", 0.7)], Some(&manufacturing), &config),
            EnhancementStrategy::ValidateTop
        );
        let close = [scored("a", "Acme Corp", 0.4), scored("b", "Acme Co", 0.38)];
        assert!(is_ambiguous(&close, config.ambiguity_threshold));
        assert_eq!(
            select_strategy(&close, Some(&manufacturing), &config),
            EnhancementStrategy::Disambiguate
        );
        assert_eq!(select_strategy(&close, None, &config), EnhancementStrategy::BatchRescore);
        assert_eq!(
            select_strategy(&[scored("a", "A", 0.92)], None, &config),
            EnhancementStrategy::Skip
        );
    }

    #[tokio::test]
    async fn test_ambiguous_with_context_disambiguates_instead_of_batch() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_disambiguation(Disambiguation {
            best_index: Some(1),
            confidence: 0.9,
            reasoning: "Acme Co is the manufacturer".into(),
        });
        let gw = gateway(&scripted);
        let config = MatcherConfig::default();
        let opts = ReasoningOptions::default();
        let enhancer = Enhancer::new(&gw, &config, &opts);

        let ctx = CompanyContext::industry("manufacturing");
        let result = enhancer
            .enhance(
                "Acme Corp",
                vec![scored("a", "Acme Corp Retail", 0.4), scored("b", "Acme Co", 0.38)],
                Some(&ctx),
            )
            .await;

        assert_eq!(result.strategy, EnhancementStrategy::Disambiguate);
        assert_eq!(scripted.calls(), vec!["disambiguate"]);
        let top = &result.candidates[0];
        assert_eq!(top.record.id, "b");
        assert!((top.confidence - (0.3 * 0.38 + 0.7 * 0.9)).abs() < 1e-9);
        assert_eq!(top.match_type, MatchType::Semantic);
    }

    #[tokio::test]
    async fn test_validate_top_blends_and_collects_suggestions() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_evaluation(
            "a",
            MatchEvaluation {
                is_match: true,
                confidence: 0.95,
                reasoning: "same company".into(),
                suggested_names: vec![],
            },
        );
        scripted.set_evaluation(
            "b",
            MatchEvaluation {
                is_match: false,
                confidence: 0.1,
                reasoning: "different".into(),
                suggested_names: vec!["Globex International".into()],
            },
        );
        let gw = gateway(&scripted);
        let config = MatcherConfig::default();
        let opts = ReasoningOptions::default();
        let enhancer = Enhancer::new(&gw, &config, &opts);

        let result = enhancer
            .enhance(
                "Globex Industries",
                vec![scored("a", "Globex Industrial", 0.8), scored("b", "Globe Inds", 0.6)],
                None,
            )
            .await;
        assert_eq!(result.strategy, EnhancementStrategy::ValidateTop);
        assert!((result.candidates[0].confidence - (0.4 * 0.8 + 0.6 * 0.95)).abs() < 1e-9);
        assert_eq!(result.candidates[0].match_type, MatchType::Semantic);
        assert!((result.candidates[1].confidence - (0.4 * 0.6 + 0.6 * 0.1)).abs() < 1e-9);
        assert_eq!(result.suggestions, vec!["Globex International"]);
    }

    #[tokio::test]
    async fn test_short_query_uses_abbreviation_check() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_abbreviation_check(AbbreviationCheck {
            is_abbreviation: true,
            confidence: 0.9,
            reasoning: "GE is General Electric".into(),
            expanded_form: Some("General Electric".into()),
        });
        let gw = gateway(&scripted);
        let config = MatcherConfig::default();
        let opts = ReasoningOptions::default();
        let result = Enhancer::new(&gw, &config, &opts)
            .enhance("GE", vec![scored("ge", "General Electric Company", 0.6)], None)
            .await;
        assert_eq!(scripted.calls(), vec!["check_abbreviation"]);
        assert_eq!(result.candidates[0].match_type, MatchType::Abbreviation);
    }

    #[tokio::test]
    async fn test_batch_rescore_filters_low_scores() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.set_batch(BatchEvaluation {
            scores: vec![
                BatchScore { index: 0, confidence: 0.05, reasoning: String::new() },
                BatchScore { index: 1, confidence: 0.9, reasoning: "likely".into() },
            ],
        });
        let gw = gateway(&scripted);
        let config = MatcherConfig::default();
        let opts = ReasoningOptions::default();
        let result = Enhancer::new(&gw, &config, &opts)
            .enhance(
                "Initech",
                vec![scored("a", "Initrode", 0.35), scored("b", "Initech Labs", 0.33)],
                None,
            )
            .await;
        assert_eq!(result.strategy, EnhancementStrategy::BatchRescore);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].record.id, "b");
    }

    #[tokio::test]
    async fn test_reasoning_failure_keeps_base_scores() {
        let scripted = Arc::new(ScriptedReasoning::new());
        scripted.fail_all();
        let gw = gateway(&scripted);
        let config = MatcherConfig::default();
        let opts = ReasoningOptions::default();
        let ctx = CompanyContext::industry("manufacturing");
        let result = Enhancer::new(&gw, &config, &opts)
            .enhance(
                "Acme Corp",
                vec![scored("a", "Acme Corp Retail", 0.4), scored("b", "Acme Co", 0.38)],
                Some(&ctx),
            )
            .await;
        assert_eq!(result.candidates[0].record.id, "a");
        assert_eq!(result.candidates[0].confidence, 0.4);
        assert_eq!(result.candidates[0].match_type, MatchType::Fuzzy);
        assert_eq!(gw.failures(), 1);
    }
}
