// src/matching/orchestrator.rs - Resolution state machine: cache, search, fast path, escalation, enhancement
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::ai::enhancer::{EnhancementStrategy, Enhancer};
use crate::ai::gateway::ReasoningGateway;
use crate::ai::reasoning::ReasoningService;
use crate::ai::types::ReasoningOptions;
use crate::ai::usage::UsageSink;
use crate::cache::ExactMatchCache;
use crate::errors::MatchError;
use crate::matching::confidence::ConfidenceScorer;
use crate::matching::formatter::{cache_hit_response, format_response, improves_on_weak, is_weak};
use crate::matching::normalize::history_key;
use crate::matching::search::{CompanySearchQuery, SearchIndex};
use crate::models::{
    CompanyContext, MatchOptions, MatchRequest, MatchResponse, ResolverStatsSnapshot,
};
use crate::utils::logging::ResolutionLogger;
use crate::utils::matcher_config::MatcherConfig;
use crate::utils::with_timeout;

pub const ALREADY_SEARCHED_MESSAGE: &str = "Already searched this term";
pub const DEPTH_EXHAUSTED_MESSAGE: &str = "Maximum search depth reached";

/// What happened during one top-level call, for debugging and tests.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTrace {
    pub request_id: String,
    pub steps: Vec<String>,
    /// Query text of every index search, in order.
    pub searched: Vec<String>,
    pub max_depth_reached: usize,
    pub cache_hit: bool,
}

/// State scoped to one top-level call and shared by reference with every recursive
/// attempt it spawns. Never shared between calls.
pub(crate) struct MatchSession {
    pub(crate) config: Arc<MatcherConfig>,
    pub(crate) context: Option<CompanyContext>,
    pub(crate) options: MatchOptions,
    pub(crate) reasoning: ReasoningOptions,
    pub(crate) logger: ResolutionLogger,
    history: HashSet<String>,
    pub(crate) trace: ResolutionTrace,
}

impl MatchSession {
    fn new(config: Arc<MatcherConfig>, request: &MatchRequest, query: &str) -> Self {
        let logger = ResolutionLogger::new(query, request.options.debug);
        let trace = ResolutionTrace {
            request_id: logger.request_id().to_string(),
            ..Default::default()
        };
        Self {
            config,
            context: request.context.clone().filter(|c| !c.is_empty()),
            options: request.options.clone(),
            reasoning: ReasoningOptions {
                model: request.options.model.clone(),
            },
            logger,
            history: HashSet::new(),
            trace,
        }
    }

    pub(crate) fn note(&mut self, depth: usize, phase: &str, details: String) {
        self.logger.log_phase(depth, phase, Some(&details));
        self.trace.steps.push(format!("[{}] {}: {}", depth, phase, details));
    }

    /// Records `query` in the search history; false when it was already there.
    fn visit(&mut self, query: &str) -> bool {
        self.history.insert(history_key(query))
    }
}

#[derive(Debug, Default)]
struct ResolverStats {
    requests: AtomicU64,
    matches: AtomicU64,
    potential_matches: AtomicU64,
    no_matches: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    fast_path_hits: AtomicU64,
    escalations_attempted: AtomicU64,
    escalations_accepted: AtomicU64,
    enhancer_runs: AtomicU64,
}

impl ResolverStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, response: &MatchResponse) {
        match response {
            MatchResponse::Match { .. } => Self::bump(&self.matches),
            MatchResponse::PotentialMatches { .. } => Self::bump(&self.potential_matches),
            MatchResponse::NoMatch { .. } => Self::bump(&self.no_matches),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.requests,
            &self.matches,
            &self.potential_matches,
            &self.no_matches,
            &self.failures,
            &self.cache_hits,
            &self.fast_path_hits,
            &self.escalations_attempted,
            &self.escalations_accepted,
            &self.enhancer_runs,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Resolves free-text company names against the registry.
///
/// One instance serves any number of concurrent calls: per-call state lives in a
/// `MatchSession`, and the only shared mutable state is the registry behind the
/// index and the atomic counters.
pub struct MatchOrchestrator {
    pub(crate) index: Arc<dyn SearchIndex>,
    pub(crate) cache: Arc<ExactMatchCache>,
    pub(crate) gateway: Option<Arc<ReasoningGateway>>,
    config: Arc<MatcherConfig>,
    stats: ResolverStats,
    pending_updates: Mutex<Vec<JoinHandle<()>>>,
}

impl MatchOrchestrator {
    /// Builds an orchestrator without a reasoning service. The exact-match cache lives
    /// in the same registry the index searches.
    pub fn new(index: Arc<dyn SearchIndex>, config: MatcherConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let cache = Arc::new(ExactMatchCache::new(index.clone(), &config));
        Ok(Self {
            index,
            cache,
            gateway: None,
            config: Arc::new(config),
            stats: ResolverStats::default(),
            pending_updates: Mutex::new(Vec::new()),
        })
    }

    /// Attaches a reasoning service. Ignored when the configuration disables AI.
    pub fn with_reasoning(
        mut self,
        service: Arc<dyn ReasoningService>,
        usage: Option<Arc<dyn UsageSink>>,
    ) -> Self {
        if !self.config.ai_enabled {
            warn!("🤖 Reasoning service supplied but AI_ENABLED is false; ignoring it");
            return self;
        }
        let usage = usage.filter(|_| self.config.usage_tracking_enabled);
        self.gateway = Some(Arc::new(ReasoningGateway::new(
            service,
            usage,
            self.config.collaborator_timeout,
        )));
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn cache(&self) -> &ExactMatchCache {
        &self.cache
    }

    pub async fn resolve(&self, request: MatchRequest) -> Result<MatchResponse, MatchError> {
        self.resolve_traced(request).await.map(|(response, _)| response)
    }

    /// `resolve`, also returning the per-call trace.
    pub async fn resolve_traced(
        &self,
        request: MatchRequest,
    ) -> Result<(MatchResponse, ResolutionTrace), MatchError> {
        let query = request.company_name.trim().to_string();
        if query.is_empty() {
            return Err(MatchError::InvalidInput(
                "companyName must not be empty".to_string(),
            ));
        }
        ResolverStats::bump(&self.stats.requests);

        let mut session = MatchSession::new(self.config.clone(), &request, &query);
        session
            .logger
            .log_start(session.context.is_some(), session.options.skip_cache);

        let result = self.match_at_depth(&mut session, query.clone(), 0).await;
        match result {
            Ok(response) => {
                self.stats.record_outcome(&response);
                if !session.trace.cache_hit {
                    self.schedule_cache_update(&query, &response, session.context.clone());
                }
                session.logger.log_completion(&response, &session.trace.steps);
                Ok((response, session.trace))
            }
            Err(e) => {
                ResolverStats::bump(&self.stats.failures);
                error!(
                    "[{}] ❌ Resolution of '{}' failed: {}",
                    session.logger.request_id(),
                    query,
                    e
                );
                Err(e)
            }
        }
    }

    /// One attempt at `depth`. Escalation only runs at depth 0; recursive attempts
    /// share the session's search history.
    pub(crate) fn match_at_depth<'a>(
        &'a self,
        session: &'a mut MatchSession,
        query: String,
        depth: usize,
    ) -> BoxFuture<'a, Result<MatchResponse, MatchError>> {
        async move {
            let config = session.config.clone();
            if depth > config.max_depth {
                session.note(depth, "depth", format!("'{}' skipped", query));
                return Ok(MatchResponse::no_match(DEPTH_EXHAUSTED_MESSAGE));
            }
            session.trace.max_depth_reached = session.trace.max_depth_reached.max(depth);

            if depth == 0 && !session.options.skip_cache {
                if let Some(hit) = self.check_cache(session, &query).await {
                    return Ok(hit);
                }
            }

            if !session.visit(&query) {
                session.note(depth, "cycle", format!("'{}' already searched", query));
                return Ok(MatchResponse::no_match(ALREADY_SEARCHED_MESSAGE));
            }

            let search_query = CompanySearchQuery::build(&query);
            debug!("Search clauses for '{}': {}", query, search_query.describe());
            session.trace.searched.push(search_query.text.clone());
            let hits = with_timeout(
                config.collaborator_timeout,
                "company index search",
                self.index.search(&search_query, config.search_limit),
            )
            .await
            .map_err(MatchError::search)?;
            let total = hits.len();
            let hits: Vec<_> = hits
                .into_iter()
                .filter(|c| c.record.has_display_name())
                .collect();
            session.note(
                depth,
                "search",
                format!("'{}' → {} hits ({} with a display name)", query, total, hits.len()),
            );

            let scorer = ConfidenceScorer::new(config.weights);
            let scored = scorer.score_all(&query, hits, session.context.as_ref());

            if let Some(top) = scored.first() {
                if top.confidence >= config.high_confidence_threshold {
                    ResolverStats::bump(&self.stats.fast_path_hits);
                    session
                        .logger
                        .log_fast_path(depth, &top.record.id, top.confidence);
                    session.note(
                        depth,
                        "fast path",
                        format!("{} at {:.3}", top.record.id, top.confidence),
                    );
                    return Ok(MatchResponse::Match {
                        matched: top.to_detail(),
                    });
                }
            }

            let top_confidence = scored.first().map_or(0.0, |c| c.confidence);
            if depth == 0 && top_confidence < config.match_threshold {
                if let Some(accepted) = self.escalate(session, &query).await? {
                    return Ok(accepted);
                }
            }

            let (candidates, suggestions) = match &self.gateway {
                Some(gateway) => {
                    let enhancement = Enhancer::new(gateway, &config, &session.reasoning)
                        .enhance(&query, scored, session.context.as_ref())
                        .await;
                    if enhancement.strategy != EnhancementStrategy::Skip {
                        ResolverStats::bump(&self.stats.enhancer_runs);
                        session.note(depth, "enhance", enhancement.strategy.as_str().to_string());
                    }
                    (enhancement.candidates, enhancement.suggestions)
                }
                None => (scored, Vec::new()),
            };

            let mut response = format_response(&candidates, &config);
            session.note(depth, "format", response.status().to_string());

            if let Some(suggestion) = suggestions.first() {
                if is_weak(&response) && depth < config.max_depth {
                    session.note(depth, "retry", format!("suggested name '{}'", suggestion));
                    let retry = self
                        .match_at_depth(session, suggestion.clone(), depth + 1)
                        .await?;
                    if improves_on_weak(&retry) {
                        response = retry;
                    }
                }
            }
            Ok(response)
        }
        .boxed()
    }

    /// Cache failures degrade to a normal search.
    async fn check_cache(&self, session: &mut MatchSession, query: &str) -> Option<MatchResponse> {
        match self.cache.lookup(query, session.context.as_ref()).await {
            Ok(lookup) => {
                let response = cache_hit_response(&lookup)?;
                if let (Some(id), Some(entry)) = (lookup.record_id(), lookup.entry.as_ref()) {
                    session
                        .logger
                        .log_cache_hit(id, entry.confidence, entry.match_count);
                }
                ResolverStats::bump(&self.stats.cache_hits);
                session.trace.cache_hit = true;
                session.note(0, "cache", "hit".to_string());
                Some(response)
            }
            Err(e) => {
                session
                    .logger
                    .log_degraded("exact-match cache", &e.to_string());
                None
            }
        }
    }

    /// Detached; the caller's response never waits for or fails on it.
    fn schedule_cache_update(
        &self,
        query: &str,
        response: &MatchResponse,
        context: Option<CompanyContext>,
    ) {
        let matched = match response.as_match() {
            Some(m) if m.confidence >= self.config.min_confidence_for_caching => m.clone(),
            _ => return,
        };
        let cache = self.cache.clone();
        let query = query.to_string();
        let handle = tokio::spawn(async move {
            match cache
                .update(
                    &matched.id,
                    &query,
                    matched.confidence,
                    matched.match_type,
                    context.as_ref(),
                )
                .await
            {
                Ok(outcome) => debug!("Cache update for '{}' → {}: {:?}", query, matched.id, outcome),
                Err(e) => warn!("Cache update for '{}' → {} discarded: {}", query, matched.id, e),
            }
        });
        match self.pending_updates.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(_) => warn!("Pending cache update list poisoned; update left untracked"),
        }
    }

    /// Waits for every detached cache update scheduled so far. Responses never wait on
    /// these; this is for shutdown and tests.
    pub async fn flush_cache_updates(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending_updates.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Cache update task ended abnormally: {}", e);
            }
        }
    }

    pub(crate) fn record_escalation(&self, accepted: bool) {
        ResolverStats::bump(&self.stats.escalations_attempted);
        if accepted {
            ResolverStats::bump(&self.stats.escalations_accepted);
        }
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        let s = &self.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ResolverStatsSnapshot {
            requests: load(&s.requests),
            matches: load(&s.matches),
            potential_matches: load(&s.potential_matches),
            no_matches: load(&s.no_matches),
            failures: load(&s.failures),
            cache_hits: load(&s.cache_hits),
            fast_path_hits: load(&s.fast_path_hits),
            escalations_attempted: load(&s.escalations_attempted),
            escalations_accepted: load(&s.escalations_accepted),
            enhancer_runs: load(&s.enhancer_runs),
            ai_calls: self.gateway.as_ref().map_or(0, |g| g.calls()),
            ai_failures: self.gateway.as_ref().map_or(0, |g| g.failures()),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        if let Some(gateway) = &self.gateway {
            gateway.reset_counters();
        }
        self.cache.reset_stats();
    }
}
