// src/ai/reasoning.rs - The generative reasoning collaborator
use anyhow::Result;
use async_trait::async_trait;

use crate::ai::types::*;
use crate::models::CompanyContext;

/// Stateless request/response calls to a generative model. Every call returns its
/// parsed answer plus optional usage metadata; failures are plain errors that callers
/// degrade on.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn evaluate_match(
        &self,
        query: &str,
        candidate: &CandidateSummary,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<MatchEvaluation>>;

    async fn check_abbreviation(
        &self,
        abbreviation: &str,
        full_name: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationCheck>>;

    /// Picks the best of up to five candidates using the supplied context.
    async fn disambiguate(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
        context: &CompanyContext,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<Disambiguation>>;

    /// Re-scores up to ten candidates in one call.
    async fn batch_evaluate(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
        options: &ReasoningOptions,
    ) -> Result<Reasoned<BatchEvaluation>>;

    async fn detect_typo(&self, query: &str, options: &ReasoningOptions)
        -> Result<Reasoned<TypoDetection>>;

    async fn generate_typo_variations(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<TypoVariations>>;

    async fn detect_corporate_structure(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<CorporateStructure>>;

    async fn identify_parent_company(
        &self,
        subsidiary: &str,
        parent: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<ParentIdentification>>;

    async fn detect_historical_name(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalNameDetection>>;

    async fn detect_historical_company(
        &self,
        former_name: &str,
        current_name: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalCompanyCheck>>;

    async fn guess_from_abbreviation(
        &self,
        abbreviation: &str,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationGuesses>>;

    async fn generate_smart_queries(
        &self,
        query: &str,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<SmartQueries>>;
}
