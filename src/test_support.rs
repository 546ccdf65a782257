// src/test_support.rs - In-process collaborators for unit tests
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ai::reasoning::ReasoningService;
use crate::ai::types::*;
use crate::matching::search::{CompanySearchQuery, SearchIndex};
use crate::models::{CacheEntry, CompanyContext, CompanyRecord, MatchCandidate};

/// A search index that is always down.
pub struct FailingIndex;

#[async_trait]
impl SearchIndex for FailingIndex {
    async fn search(&self, _query: &CompanySearchQuery, _limit: usize) -> Result<Vec<MatchCandidate>> {
        Err(anyhow!("connection refused"))
    }

    async fn get_by_id(&self, _id: &str) -> Result<Option<CompanyRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn find_by_cache_entry(
        &self,
        _normalized_query: &str,
        _context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn persist_cache_entries(&self, _id: &str, _entries: &[CacheEntry]) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// Searches normally, but the exact-match cache columns are unreachable.
pub struct CacheFailingIndex {
    inner: Arc<dyn SearchIndex>,
}

impl CacheFailingIndex {
    pub fn new(inner: Arc<dyn SearchIndex>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SearchIndex for CacheFailingIndex {
    async fn search(&self, query: &CompanySearchQuery, limit: usize) -> Result<Vec<MatchCandidate>> {
        self.inner.search(query, limit).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CompanyRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_cache_entry(
        &self,
        _normalized_query: &str,
        _context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>> {
        Err(anyhow!("cache column unavailable"))
    }

    async fn persist_cache_entries(&self, _id: &str, _entries: &[CacheEntry]) -> Result<()> {
        Err(anyhow!("cache column unavailable"))
    }
}

/// Delegates to another index and records the text of every search.
pub struct CountingIndex {
    inner: Arc<dyn SearchIndex>,
    searched: Mutex<Vec<String>>,
}

impl CountingIndex {
    pub fn new(inner: Arc<dyn SearchIndex>) -> Self {
        Self {
            inner,
            searched: Mutex::new(Vec::new()),
        }
    }

    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }

    pub fn search_count(&self) -> usize {
        self.searched.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchIndex for CountingIndex {
    async fn search(&self, query: &CompanySearchQuery, limit: usize) -> Result<Vec<MatchCandidate>> {
        self.searched.lock().unwrap().push(query.text.clone());
        self.inner.search(query, limit).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CompanyRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_cache_entry(
        &self,
        normalized_query: &str,
        context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>> {
        self.inner.find_by_cache_entry(normalized_query, context_hash).await
    }

    async fn persist_cache_entries(&self, id: &str, entries: &[CacheEntry]) -> Result<()> {
        self.inner.persist_cache_entries(id, entries).await
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<String>,
    fail_all: bool,
    delay: Option<Duration>,
    usage: Option<TokenUsage>,
    evaluations: HashMap<String, MatchEvaluation>,
    abbreviation_check: Option<AbbreviationCheck>,
    disambiguation: Option<Disambiguation>,
    batch: Option<BatchEvaluation>,
    typo: Option<TypoDetection>,
    typo_variations: Option<TypoVariations>,
    corporate_structure: Option<CorporateStructure>,
    parent_identification: Option<ParentIdentification>,
    historical: Option<HistoricalNameDetection>,
    historical_check: Option<HistoricalCompanyCheck>,
    abbreviation_guesses: Option<AbbreviationGuesses>,
    smart_queries: Option<SmartQueries>,
}

/// Reasoning service with canned answers. Every call is recorded by operation name;
/// operations without a scripted answer fail like an unreachable service.
#[derive(Default)]
pub struct ScriptedReasoning {
    script: Mutex<Script>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.script.get_mut().unwrap().usage = Some(usage);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.get_mut().unwrap().delay = Some(delay);
        self
    }

    pub fn fail_all(&self) {
        self.script.lock().unwrap().fail_all = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Evaluation returned for the candidate with this id.
    pub fn set_evaluation(&self, candidate_id: &str, evaluation: MatchEvaluation) {
        self.script
            .lock()
            .unwrap()
            .evaluations
            .insert(candidate_id.to_string(), evaluation);
    }

    pub fn set_abbreviation_check(&self, check: AbbreviationCheck) {
        self.script.lock().unwrap().abbreviation_check = Some(check);
    }

    pub fn set_disambiguation(&self, answer: Disambiguation) {
        self.script.lock().unwrap().disambiguation = Some(answer);
    }

    pub fn set_batch(&self, answer: BatchEvaluation) {
        self.script.lock().unwrap().batch = Some(answer);
    }

    pub fn set_typo(&self, answer: TypoDetection) {
        self.script.lock().unwrap().typo = Some(answer);
    }

    pub fn set_typo_variations(&self, answer: TypoVariations) {
        self.script.lock().unwrap().typo_variations = Some(answer);
    }

    pub fn set_corporate_structure(&self, answer: CorporateStructure) {
        self.script.lock().unwrap().corporate_structure = Some(answer);
    }

    pub fn set_parent_identification(&self, answer: ParentIdentification) {
        self.script.lock().unwrap().parent_identification = Some(answer);
    }

    pub fn set_historical(&self, answer: HistoricalNameDetection) {
        self.script.lock().unwrap().historical = Some(answer);
    }

    pub fn set_historical_check(&self, answer: HistoricalCompanyCheck) {
        self.script.lock().unwrap().historical_check = Some(answer);
    }

    pub fn set_abbreviation_guesses(&self, answer: AbbreviationGuesses) {
        self.script.lock().unwrap().abbreviation_guesses = Some(answer);
    }

    pub fn set_smart_queries(&self, answer: SmartQueries) {
        self.script.lock().unwrap().smart_queries = Some(answer);
    }

    async fn answer<T, F>(&self, operation: &str, pick: F) -> Result<Reasoned<T>>
    where
        F: FnOnce(&Script) -> Option<T> + Send,
        T: Send,
    {
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(operation.to_string());
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.script.lock().unwrap();
        if script.fail_all {
            bail!("scripted failure for {}", operation);
        }
        match pick(&script) {
            Some(value) => Ok(Reasoned::new(value, script.usage)),
            None => bail!("no scripted answer for {}", operation),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn evaluate_match(
        &self,
        _query: &str,
        candidate: &CandidateSummary,
        _context: Option<&CompanyContext>,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<MatchEvaluation>> {
        let id = candidate.id.clone();
        self.answer("evaluate_match", move |s| s.evaluations.get(&id).cloned())
            .await
    }

    async fn check_abbreviation(
        &self,
        _abbreviation: &str,
        _full_name: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationCheck>> {
        self.answer("check_abbreviation", |s| s.abbreviation_check.clone())
            .await
    }

    async fn disambiguate(
        &self,
        _query: &str,
        _candidates: &[CandidateSummary],
        _context: &CompanyContext,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<Disambiguation>> {
        self.answer("disambiguate", |s| s.disambiguation.clone()).await
    }

    async fn batch_evaluate(
        &self,
        _query: &str,
        _candidates: &[CandidateSummary],
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<BatchEvaluation>> {
        self.answer("batch_evaluate", |s| s.batch.clone()).await
    }

    async fn detect_typo(&self, _query: &str, _options: &ReasoningOptions) -> Result<Reasoned<TypoDetection>> {
        self.answer("detect_typo", |s| s.typo.clone()).await
    }

    async fn generate_typo_variations(
        &self,
        _query: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<TypoVariations>> {
        self.answer("generate_typo_variations", |s| s.typo_variations.clone())
            .await
    }

    async fn detect_corporate_structure(
        &self,
        _query: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<CorporateStructure>> {
        self.answer("detect_corporate_structure", |s| s.corporate_structure.clone())
            .await
    }

    async fn identify_parent_company(
        &self,
        _subsidiary: &str,
        _parent: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<ParentIdentification>> {
        self.answer("identify_parent_company", |s| s.parent_identification.clone())
            .await
    }

    async fn detect_historical_name(
        &self,
        _query: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalNameDetection>> {
        self.answer("detect_historical_name", |s| s.historical.clone())
            .await
    }

    async fn detect_historical_company(
        &self,
        _former_name: &str,
        _current_name: &str,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalCompanyCheck>> {
        self.answer("detect_historical_company", |s| s.historical_check.clone())
            .await
    }

    async fn guess_from_abbreviation(
        &self,
        _abbreviation: &str,
        _context: Option<&CompanyContext>,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationGuesses>> {
        self.answer("guess_from_abbreviation", |s| s.abbreviation_guesses.clone())
            .await
    }

    async fn generate_smart_queries(
        &self,
        _query: &str,
        _context: Option<&CompanyContext>,
        _options: &ReasoningOptions,
    ) -> Result<Reasoned<SmartQueries>> {
        self.answer("generate_smart_queries", |s| s.smart_queries.clone())
            .await
    }
}
