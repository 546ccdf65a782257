// src/cache/exact_match.rs - Per-record exact-match cache with recency/frequency ranking
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cache::context_hash::context_hash;
use crate::errors::MatchError;
use crate::matching::normalize::normalize_company_name;
use crate::matching::search::SearchIndex;
use crate::models::{CacheEntry, CacheStatsSnapshot, CompanyContext, CompanyRecord, MatchType};
use crate::utils::matcher_config::MatcherConfig;
use crate::utils::with_timeout;

const FRESH_HOURS: f64 = 24.0;
const STALE_HOURS: f64 = 720.0;
const STATS_LOG_INTERVAL: u64 = 100;

/// Result of a cache lookup. `record` and `entry` are set exactly when `hit` is.
#[derive(Debug, Clone, Default)]
pub struct CacheLookup {
    pub hit: bool,
    pub record: Option<CompanyRecord>,
    pub entry: Option<CacheEntry>,
}

impl CacheLookup {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Confidence below the caching floor; nothing written.
    Skipped,
    Inserted { evicted: usize },
    Refreshed { match_count: u32 },
}

#[derive(Debug, Default)]
struct CacheStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    skipped_updates: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            skipped_updates: self.skipped_updates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.lookups,
            &self.hits,
            &self.misses,
            &self.updates,
            &self.skipped_updates,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Remembers confirmed query → record mappings inside the records themselves, so a
/// repeated query can skip the search entirely.
pub struct ExactMatchCache {
    index: Arc<dyn SearchIndex>,
    min_confidence: f64,
    max_entries_per_record: usize,
    timeout: Duration,
    /// Serializes read-modify-write of embedded entries within this process.
    write_lock: Mutex<()>,
    stats: CacheStats,
}

impl ExactMatchCache {
    pub fn new(index: Arc<dyn SearchIndex>, config: &MatcherConfig) -> Self {
        info!(
            "Initializing exact-match cache (min confidence {:.2}, max {} entries/record)",
            config.min_confidence_for_caching, config.max_entries_per_record
        );
        Self {
            index,
            min_confidence: config.min_confidence_for_caching,
            max_entries_per_record: config.max_entries_per_record,
            timeout: config.collaborator_timeout,
            write_lock: Mutex::new(()),
            stats: CacheStats::default(),
        }
    }

    pub async fn lookup(
        &self,
        query: &str,
        context: Option<&CompanyContext>,
    ) -> Result<CacheLookup, MatchError> {
        self.lookup_at(query, context, Utc::now()).await
    }

    /// `lookup` with an explicit clock for the recency component of the ranking.
    pub async fn lookup_at(
        &self,
        query: &str,
        context: Option<&CompanyContext>,
        now: DateTime<Utc>,
    ) -> Result<CacheLookup, MatchError> {
        let lookups = self.stats.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        if lookups % STATS_LOG_INTERVAL == 0 {
            let s = self.stats.snapshot();
            info!(
                "ExactMatchCache stats - lookups: {}, hits: {}, misses: {}, hit rate: {:.2}%",
                s.lookups,
                s.hits,
                s.misses,
                s.hit_rate() * 100.0
            );
        }

        let normalized = normalize_company_name(query);
        if normalized.is_empty() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::miss());
        }
        let hash = context_hash(context);

        let records = with_timeout(
            self.timeout,
            "cache lookup",
            self.index.find_by_cache_entry(&normalized, Some(&hash)),
        )
        .await
        .map_err(|e| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            MatchError::CacheUnavailable(format!("{:#}", e))
        })?;

        let best = records
            .into_iter()
            .filter(CompanyRecord::has_display_name)
            .filter_map(|record| {
                let entry = record
                    .exact_match_cache
                    .iter()
                    .filter(|e| e.matches(&normalized, Some(&hash)))
                    .max_by(|a, b| {
                        best_match_score(a, now)
                            .partial_cmp(&best_match_score(b, now))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })?
                    .clone();
                Some((best_match_score(&entry, now), record, entry))
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((score, record, entry)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Cache hit for '{}' → {} (best-match score {:.3})",
                    normalized, record.id, score
                );
                Ok(CacheLookup {
                    hit: true,
                    record: Some(record),
                    entry: Some(entry),
                })
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(CacheLookup::miss())
            }
        }
    }

    pub async fn update(
        &self,
        record_id: &str,
        query: &str,
        confidence: f64,
        match_type: MatchType,
        context: Option<&CompanyContext>,
    ) -> Result<UpdateOutcome, MatchError> {
        self.update_at(record_id, query, confidence, match_type, context, Utc::now())
            .await
    }

    /// `update` with an explicit timestamp for the entry.
    pub async fn update_at(
        &self,
        record_id: &str,
        query: &str,
        confidence: f64,
        match_type: MatchType,
        context: Option<&CompanyContext>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, MatchError> {
        let normalized = normalize_company_name(query);
        if confidence < self.min_confidence || normalized.is_empty() {
            self.stats.skipped_updates.fetch_add(1, Ordering::Relaxed);
            return Ok(UpdateOutcome::Skipped);
        }
        let hash = context_hash(context);

        let _guard = self.write_lock.lock().await;
        let result = self
            .write_entry(record_id, query, &normalized, &hash, confidence, match_type, now)
            .await;
        match &result {
            Ok(outcome) => {
                self.stats.updates.fetch_add(1, Ordering::Relaxed);
                debug!("Cache update for {} '{}': {:?}", record_id, normalized, outcome);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache update for {} failed: {}", record_id, e);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_entry(
        &self,
        record_id: &str,
        query: &str,
        normalized: &str,
        hash: &str,
        confidence: f64,
        match_type: MatchType,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, MatchError> {
        let record = with_timeout(self.timeout, "cache read", self.index.get_by_id(record_id))
            .await
            .map_err(|e| MatchError::CacheUnavailable(format!("{:#}", e)))?
            .ok_or_else(|| {
                MatchError::CacheUnavailable(format!("record {} not found", record_id))
            })?;

        let mut entries = record.exact_match_cache;
        let outcome = match entries
            .iter_mut()
            .find(|e| e.normalized_query == normalized && e.context_hash.as_deref() == Some(hash))
        {
            Some(existing) => {
                existing.match_count = existing.match_count.saturating_add(1);
                existing.last_matched_at = now;
                existing.confidence = existing.confidence.max(confidence);
                UpdateOutcome::Refreshed {
                    match_count: existing.match_count,
                }
            }
            None => {
                // Room is made among the existing entries so the incoming one survives.
                let evicted =
                    evict_to_capacity(&mut entries, self.max_entries_per_record.saturating_sub(1));
                entries.push(CacheEntry {
                    query: query.trim().to_string(),
                    normalized_query: normalized.to_string(),
                    confidence,
                    match_count: 1,
                    last_matched_at: now,
                    context_hash: Some(hash.to_string()),
                    match_type,
                });
                UpdateOutcome::Inserted {
                    evicted: evicted.len(),
                }
            }
        };

        with_timeout(
            self.timeout,
            "cache write",
            self.index.persist_cache_entries(record_id, &entries),
        )
        .await
        .map_err(|e| MatchError::CacheUnavailable(format!("{:#}", e)))?;
        Ok(outcome)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        info!("Exact-match cache statistics reset");
    }
}

/// 1 within a day, 0 after thirty days, linear in between.
pub fn recency_score(last_matched_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - last_matched_at).num_seconds() as f64 / 3600.0;
    if age_hours <= FRESH_HOURS {
        1.0
    } else if age_hours >= STALE_HOURS {
        0.0
    } else {
        1.0 - (age_hours - FRESH_HOURS) / (STALE_HOURS - FRESH_HOURS)
    }
}

/// Ranking among several hits for the same query.
pub fn best_match_score(entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
    let frequency = (entry.match_count as f64 / 10.0).min(1.0);
    0.4 * entry.confidence + 0.3 * frequency + 0.3 * recency_score(entry.last_matched_at, now)
}

/// Drops the least-used entries (lowest match count, then oldest) until at most `cap`
/// remain. Returns the evicted entries.
pub fn evict_to_capacity(entries: &mut Vec<CacheEntry>, cap: usize) -> Vec<CacheEntry> {
    if entries.len() <= cap {
        return Vec::new();
    }
    entries.sort_by(|a, b| {
        a.match_count
            .cmp(&b.match_count)
            .then(a.last_matched_at.cmp(&b.last_matched_at))
    });
    let excess = entries.len() - cap;
    entries.drain(..excess).collect()
}
