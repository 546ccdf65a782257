// src/registry/memory.rs - In-process company registry
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use strsim::osa_distance;
use tokio::sync::RwLock;

use crate::matching::normalize::{initials, normalize_company_name};
use crate::matching::search::{ClauseKind, CompanySearchQuery, SearchClause, SearchIndex};
use crate::models::{CacheEntry, CompanyRecord, MatchCandidate};

/// Registry held in memory. Evaluates the multi-clause query directly: a record's
/// relevance is the boosted sum of the clauses any of its field values satisfy.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<HashMap<String, CompanyRecord>>,
}

impl InMemoryRegistry {
    pub fn new(records: Vec<CompanyRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Loads a JSON array of records.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file {}", path.display()))?;
        let records: Vec<CompanyRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse registry file {}", path.display()))?;
        info!("Loaded {} company records from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    pub async fn upsert(&self, record: CompanyRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn clause_score(clause: &SearchClause, value: &str) -> f64 {
    let normalized = normalize_company_name(value);
    if normalized.is_empty() {
        return 0.0;
    }
    let strength = match &clause.kind {
        ClauseKind::Term => flag(normalized == clause.value),
        ClauseKind::Phrase => flag(value.to_lowercase().contains(&clause.value)),
        ClauseKind::Fuzzy { max_edits } => {
            let whole = osa_distance(&normalized, &clause.value);
            let best = normalized
                .split(' ')
                .map(|token| osa_distance(token, &clause.value))
                .fold(whole, usize::min);
            if best <= *max_edits {
                1.0 - best as f64 / (*max_edits as f64 + 1.0)
            } else {
                0.0
            }
        }
        ClauseKind::Wildcard => {
            if normalized.starts_with(&clause.value) {
                1.0
            } else if normalized.split(' ').any(|t| t.starts_with(&clause.value)) {
                0.5
            } else {
                0.0
            }
        }
        ClauseKind::Acronym => {
            flag(initials(&normalized) == clause.value || initials(value) == clause.value)
        }
    };
    strength * clause.boost
}

fn flag(satisfied: bool) -> f64 {
    if satisfied {
        1.0
    } else {
        0.0
    }
}

/// Relevance of `record` for `query`; each clause counts once, at its best field value.
pub fn relevance(query: &CompanySearchQuery, record: &CompanyRecord) -> f64 {
    query
        .clauses
        .iter()
        .map(|clause| {
            clause
                .field
                .values(record)
                .into_iter()
                .map(|value| clause_score(clause, value))
                .fold(0.0_f64, f64::max)
        })
        .sum()
}

#[async_trait]
impl SearchIndex for InMemoryRegistry {
    async fn search(&self, query: &CompanySearchQuery, limit: usize) -> Result<Vec<MatchCandidate>> {
        let records = self.records.read().await;
        let mut hits: Vec<MatchCandidate> = records
            .values()
            .filter_map(|record| {
                let score = relevance(query, record);
                (score > 0.0).then(|| MatchCandidate {
                    record: record.clone(),
                    raw_relevance_score: score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.raw_relevance_score
                .partial_cmp(&a.raw_relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CompanyRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_cache_entry(
        &self,
        normalized_query: &str,
        context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<CompanyRecord> = records
            .values()
            .filter(|r| {
                r.exact_match_cache
                    .iter()
                    .any(|e| e.matches(normalized_query, context_hash))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn persist_cache_entries(&self, id: &str, entries: &[CacheEntry]) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| anyhow!("Company record {} not found", id))?;
        record.exact_match_cache = entries.to_vec();
        Ok(())
    }
}
