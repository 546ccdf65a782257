// src/ai/ollama.rs - Reasoning service backed by an Ollama-compatible /api/generate endpoint
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use lru::LruCache;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ai::reasoning::ReasoningService;
use crate::ai::types::*;
use crate::errors::MatchError;
use crate::models::CompanyContext;

#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub url: String,
    pub model: String,
    pub max_retries: usize,
    pub request_timeout: Duration,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    /// Memoized prompts; 0 disables the memo.
    pub memo_size: usize,
    pub debug_mode: bool,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            temperature: 0.1,
            top_p: 0.9,
            repeat_penalty: 1.1,
            memo_size: 1000,
            debug_mode: false,
        }
    }
}

impl ReasoningConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            url: env::var("OLLAMA_URL").unwrap_or(d.url),
            model: env::var("OLLAMA_MODEL").unwrap_or(d.model),
            max_retries: env::var("AI_MAX_RETRIES")
                .unwrap_or_else(|_| d.max_retries.to_string())
                .parse()
                .unwrap_or(d.max_retries),
            request_timeout: Duration::from_secs(
                env::var("AI_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            temperature: env::var("AI_TEMPERATURE")
                .unwrap_or_else(|_| d.temperature.to_string())
                .parse()
                .unwrap_or(d.temperature),
            top_p: d.top_p,
            repeat_penalty: d.repeat_penalty,
            memo_size: env::var("AI_MEMO_SIZE")
                .unwrap_or_else(|_| d.memo_size.to_string())
                .parse()
                .unwrap_or(d.memo_size),
            debug_mode: env::var("DEBUG").is_ok(),
        }
    }

    pub fn log_config(&self) {
        info!(
            "🤖 Reasoning service: {} (model {}, retries {}, request timeout {:?}, memo {})",
            self.url, self.model, self.max_retries, self.request_timeout, self.memo_size
        );
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    format: serde_json::Value,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

pub struct OllamaReasoning {
    client: Client,
    config: ReasoningConfig,
    memo: Option<Mutex<LruCache<String, String>>>,
}

impl OllamaReasoning {
    pub fn new(config: ReasoningConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client for reasoning service")?;
        let memo = NonZeroUsize::new(config.memo_size).map(|size| Mutex::new(LruCache::new(size)));
        Ok(Self {
            client,
            config,
            memo,
        })
    }

    pub async fn test_connection(&self) -> Result<()> {
        let request = OllamaRequest {
            model: &self.config.model,
            prompt: "Reply with {}",
            format: json!({}),
            stream: false,
            options: self.options(),
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.config.url))
            .json(&request)
            .send()
            .await
            .context("Failed to reach reasoning service")?;
        if !response.status().is_success() {
            return Err(anyhow!("Reasoning service returned status: {}", response.status()));
        }
        info!("✅ Reasoning service reachable at {}", self.config.url);
        Ok(())
    }

    fn options(&self) -> OllamaOptions {
        OllamaOptions {
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            repeat_penalty: self.config.repeat_penalty,
        }
    }

    fn memo_get(&self, key: &str) -> Option<String> {
        let memo = self.memo.as_ref()?;
        let mut guard = memo.lock().ok()?;
        guard.get(key).cloned()
    }

    fn memo_put(&self, key: String, raw: String) {
        if let Some(memo) = &self.memo {
            if let Ok(mut guard) = memo.lock() {
                guard.put(key, raw);
            }
        }
    }

    /// Sends one structured-output prompt, retrying with linear backoff. Identical
    /// (model, prompt) pairs are answered from the memo without usage.
    async fn generate<T: DeserializeOwned>(
        &self,
        operation: &str,
        prompt: String,
        schema: serde_json::Value,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<T>> {
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let memo_key = format!("{}\u{1f}{}", model, prompt);
        if let Some(raw) = self.memo_get(&memo_key) {
            if let Ok(value) = parse_model_output::<T>(&raw) {
                debug!("🤖 {} answered from memo", operation);
                return Ok(Reasoned::free(value));
            }
        }

        let request = OllamaRequest {
            model,
            prompt: &prompt,
            format: schema,
            stream: false,
            options: self.options(),
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let started = Instant::now();
            match self.attempt(&request).await {
                Ok(response) => match parse_model_output::<T>(&response.response) {
                    Ok(value) => {
                        let usage = TokenUsage {
                            prompt_tokens: response.prompt_eval_count.unwrap_or(0),
                            completion_tokens: response.eval_count.unwrap_or(0),
                            latency_ms: started.elapsed().as_millis() as u64,
                        };
                        self.memo_put(memo_key, response.response);
                        return Ok(Reasoned::new(value, Some(usage)));
                    }
                    Err(e) => {
                        if self.config.debug_mode {
                            debug!("Raw {} response: {}", operation, response.response);
                        }
                        last_error = Some(e);
                    }
                },
                Err(e) => last_error = Some(e),
            }
            if attempt < attempts {
                debug!("🤖 {} attempt {} failed, retrying...", operation, attempt);
                tokio::time::sleep(Duration::from_millis(1000 * attempt as u64)).await;
            }
        }
        let err = last_error.unwrap_or_else(|| anyhow!("no attempts were made"));
        warn!("🤖 {} failed after {} attempts: {:#}", operation, attempts, err);
        Err(err.context(format!("Reasoning operation '{}' failed", operation)))
    }

    async fn attempt(&self, request: &OllamaRequest<'_>) -> Result<OllamaResponse> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.config.url))
            .json(request)
            .send()
            .await
            .map_err(|e| MatchError::ReasoningUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MatchError::ReasoningUnavailable(format!(
                "service returned status {}",
                response.status()
            ))
            .into());
        }
        response
            .json::<OllamaResponse>()
            .await
            .context("Failed to parse reasoning service envelope")
    }
}

/// Parses model output as `T`: directly, then the first balanced JSON object embedded
/// in the text, then after stripping code fences and trailing commas.
pub fn parse_model_output<T: DeserializeOwned>(raw: &str) -> Result<T> {
    if let Ok(value) = serde_json::from_str::<T>(raw) {
        return Ok(value);
    }
    if let Some(embedded) = extract_json_object(raw) {
        if let Ok(value) = serde_json::from_str::<T>(&embedded) {
            return Ok(value);
        }
    }
    let cleaned = clean_json_response(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(value) => Ok(value),
        Err(e) => Err(MatchError::MalformedResponse(format!(
            "{} (response began with {:?})",
            e,
            raw.chars().take(80).collect::<String>()
        ))
        .into()),
    }
}

fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn clean_json_response(response: &str) -> String {
    response
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .replace(",\n}", "\n}")
        .replace(",}", "}")
        .replace(",\n]", "\n]")
        .replace(",]", "]")
        .trim()
        .to_string()
}

fn describe_context(context: Option<&CompanyContext>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => ctx
            .supplied_fields()
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "none".to_string(),
    }
}

fn describe_candidates(candidates: &[CandidateSummary]) -> String {
    serde_json::to_string_pretty(candidates).unwrap_or_else(|_| "[]".to_string())
}

fn suggestion_list_schema(key: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            key: {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                    },
                    "required": ["name", "confidence"]
                }
            }
        },
        "required": [key]
    })
}

fn confidence_schema() -> serde_json::Value {
    json!({"type": "number", "minimum": 0.0, "maximum": 1.0})
}

#[async_trait]
impl ReasoningService for OllamaReasoning {
    async fn evaluate_match(
        &self,
        query: &str,
        candidate: &CandidateSummary,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<MatchEvaluation>> {
        let prompt = format!(
            "You resolve company names to registry entities.\n\
             Query: \"{}\"\nContext: {}\nCandidate:\n{}\n\n\
             Decide whether the query refers to this candidate. `confidence` is the probability \
             that it does. If it does not, list other company names the query might mean in \
             `suggested_names`.",
            query,
            describe_context(context),
            describe_candidates(std::slice::from_ref(candidate))
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_match": {"type": "boolean"},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"},
                "suggested_names": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["is_match", "confidence", "reasoning"]
        });
        self.generate("evaluate_match", prompt, schema, options).await
    }

    async fn check_abbreviation(
        &self,
        abbreviation: &str,
        full_name: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationCheck>> {
        let prompt = format!(
            "Is \"{}\" a commonly used abbreviation, acronym or ticker for the company \"{}\"?",
            abbreviation, full_name
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_abbreviation": {"type": "boolean"},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"},
                "expanded_form": {"type": "string"}
            },
            "required": ["is_abbreviation", "confidence"]
        });
        self.generate("check_abbreviation", prompt, schema, options).await
    }

    async fn disambiguate(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
        context: &CompanyContext,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<Disambiguation>> {
        let prompt = format!(
            "Several registry entities match the company name \"{}\" almost equally well.\n\
             Context supplied by the caller: {}\nCandidates:\n{}\n\n\
             Return the `index` of the candidate the caller most likely means as `best_index` \
             (omit it if none fits) and your confidence.",
            query,
            describe_context(Some(context)),
            describe_candidates(candidates)
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "best_index": {"type": "integer", "minimum": 0},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"}
            },
            "required": ["confidence", "reasoning"]
        });
        self.generate("disambiguate", prompt, schema, options).await
    }

    async fn batch_evaluate(
        &self,
        query: &str,
        candidates: &[CandidateSummary],
        options: &ReasoningOptions,
    ) -> Result<Reasoned<BatchEvaluation>> {
        let prompt = format!(
            "Score how likely each candidate is the company named \"{}\".\nCandidates:\n{}\n\n\
             Return one score per candidate `index`.",
            query,
            describe_candidates(candidates)
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "index": {"type": "integer", "minimum": 0},
                            "confidence": confidence_schema(),
                            "reasoning": {"type": "string"}
                        },
                        "required": ["index", "confidence"]
                    }
                }
            },
            "required": ["scores"]
        });
        self.generate("batch_evaluate", prompt, schema, options).await
    }

    async fn detect_typo(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<TypoDetection>> {
        let prompt = format!(
            "Is \"{}\" a misspelling of a well-known company name? If so give the corrected name.",
            query
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_typo": {"type": "boolean"},
                "corrected_name": {"type": "string"},
                "confidence": confidence_schema()
            },
            "required": ["is_typo", "confidence"]
        });
        self.generate("detect_typo", prompt, schema, options).await
    }

    async fn generate_typo_variations(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<TypoVariations>> {
        let prompt = format!(
            "List up to five correctly spelled company names that \"{}\" may be a misspelling of.",
            query
        );
        let schema = json!({
            "type": "object",
            "properties": {"variations": {"type": "array", "items": {"type": "string"}}},
            "required": ["variations"]
        });
        self.generate("generate_typo_variations", prompt, schema, options)
            .await
    }

    async fn detect_corporate_structure(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<CorporateStructure>> {
        let prompt = format!(
            "Is \"{}\" a subsidiary, division, brand or regional unit of a larger company? \
             If so list the likely parent company names.",
            query
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_subsidiary": {"type": "boolean"},
                "parent_candidates": {"type": "array", "items": {"type": "string"}},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"}
            },
            "required": ["is_subsidiary", "confidence"]
        });
        self.generate("detect_corporate_structure", prompt, schema, options)
            .await
    }

    async fn identify_parent_company(
        &self,
        subsidiary: &str,
        parent: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<ParentIdentification>> {
        let prompt = format!(
            "Is \"{}\" owned by, or a division of, \"{}\"?",
            subsidiary, parent
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_subsidiary": {"type": "boolean"},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"}
            },
            "required": ["is_subsidiary", "confidence", "reasoning"]
        });
        self.generate("identify_parent_company", prompt, schema, options)
            .await
    }

    async fn detect_historical_name(
        &self,
        query: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalNameDetection>> {
        let prompt = format!(
            "Is \"{}\" a former name of a company that has since been renamed, merged or \
             acquired? If so list its current names.",
            query
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_historical": {"type": "boolean"},
                "current_names": {"type": "array", "items": {"type": "string"}},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"}
            },
            "required": ["is_historical", "confidence"]
        });
        self.generate("detect_historical_name", prompt, schema, options)
            .await
    }

    async fn detect_historical_company(
        &self,
        former_name: &str,
        current_name: &str,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<HistoricalCompanyCheck>> {
        let prompt = format!(
            "Was the company now called \"{}\" previously known as \"{}\"?",
            current_name, former_name
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "is_same_company": {"type": "boolean"},
                "confidence": confidence_schema(),
                "reasoning": {"type": "string"}
            },
            "required": ["is_same_company", "confidence", "reasoning"]
        });
        self.generate("detect_historical_company", prompt, schema, options)
            .await
    }

    async fn guess_from_abbreviation(
        &self,
        abbreviation: &str,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<AbbreviationGuesses>> {
        let prompt = format!(
            "\"{}\" is an abbreviated company name. Context: {}.\n\
             Guess the full company names it most likely stands for.",
            abbreviation,
            describe_context(context)
        );
        self.generate(
            "guess_from_abbreviation",
            prompt,
            suggestion_list_schema("guesses"),
            options,
        )
        .await
    }

    async fn generate_smart_queries(
        &self,
        query: &str,
        context: Option<&CompanyContext>,
        options: &ReasoningOptions,
    ) -> Result<Reasoned<SmartQueries>> {
        let prompt = format!(
            "A registry search for the company \"{}\" (context: {}) found nothing useful.\n\
             Suggest alternative search queries: official names, common variants, brand or \
             parent names.",
            query,
            describe_context(context)
        );
        self.generate(
            "generate_smart_queries",
            prompt,
            suggestion_list_schema("queries"),
            options,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_json() {
        let parsed: MatchEvaluation =
            parse_model_output(r#"{"is_match": false, "confidence": 0.2, "reasoning": "no"}"#)
                .unwrap();
        assert!(!parsed.is_match);
    }

    #[test]
    fn test_parse_json_embedded_in_prose() {
        let raw = "Sure! Here is my answer:\n```json\n{\"is_typo\": true, \"corrected_name\": \"Acme {Intl}\", \"confidence\": 0.9}\n```\nHope that helps.";
        let parsed: TypoDetection = parse_model_output(raw).unwrap();
        assert_eq!(parsed.corrected_name.as_deref(), Some("Acme {Intl}"));
    }

    #[test]
    fn test_parse_trailing_commas() {
        let raw = "```json\n{\"guesses\": [{\"name\": \"XYZ Corp\", \"confidence\": 0.5},],}\n```";
        let parsed: AbbreviationGuesses = parse_model_output(raw).unwrap();
        assert_eq!(parsed.guesses.len(), 1);
    }

    #[test]
    fn test_unparseable_output_is_malformed() {
        let err = parse_model_output::<MatchEvaluation>("I think they are the same company")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchError>(),
            Some(MatchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = ReasoningConfig::default();
        assert_eq!(config.max_retries, 3);
        assert!(OllamaReasoning::new(config).is_ok());
    }

    #[test]
    fn test_context_description() {
        assert_eq!(describe_context(None), "none");
        assert_eq!(
            describe_context(Some(&CompanyContext::industry("manufacturing"))),
            "industry: manufacturing"
        );
    }
}
