// src/registry/postgres.rs - PostgreSQL company registry (pg_trgm similarity for fuzzy clauses)
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::matching::normalize::{initials, normalize_company_name};
use crate::matching::search::{ClauseKind, CompanySearchQuery, SearchField, SearchIndex};
use crate::models::{CacheEntry, CompanyRecord, MatchCandidate};
use crate::utils::db_connect::PgPool;

const RECORD_COLUMNS: &str = "id, display_name, submitting_names, parent_display_name, ai_aliases, \
     industry, region, size, exact_match_cache";

/// pg_trgm similarity below this contributes nothing to a fuzzy clause.
const TRIGRAM_FLOOR: f64 = 0.3;

pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a record together with its derived search columns.
    pub async fn upsert_record(&self, record: &CompanyRecord) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for company upsert")?;
        let normalized_name = record.display_name.as_deref().map(normalize_company_name);
        let name_initials = normalized_name.as_deref().map(initials);
        let normalized_submitting: Vec<String> = record
            .submitting_names
            .iter()
            .map(|n| normalize_company_name(n))
            .collect();
        let normalized_aliases: Vec<String> =
            record.ai_aliases.iter().map(|n| normalize_company_name(n)).collect();
        let normalized_parent = record
            .parent_display_name
            .as_deref()
            .map(normalize_company_name);
        let cache = serde_json::to_value(&record.exact_match_cache)
            .context("Failed to serialize exact-match cache")?;

        conn.execute(
            "INSERT INTO company (id, display_name, submitting_names, parent_display_name, ai_aliases,
                                  industry, region, size, exact_match_cache, normalized_name,
                                  name_initials, normalized_submitting_names, normalized_aliases,
                                  normalized_parent_name)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                submitting_names = EXCLUDED.submitting_names,
                parent_display_name = EXCLUDED.parent_display_name,
                ai_aliases = EXCLUDED.ai_aliases,
                industry = EXCLUDED.industry,
                region = EXCLUDED.region,
                size = EXCLUDED.size,
                exact_match_cache = EXCLUDED.exact_match_cache,
                normalized_name = EXCLUDED.normalized_name,
                name_initials = EXCLUDED.name_initials,
                normalized_submitting_names = EXCLUDED.normalized_submitting_names,
                normalized_aliases = EXCLUDED.normalized_aliases,
                normalized_parent_name = EXCLUDED.normalized_parent_name,
                updated_at = CURRENT_TIMESTAMP",
            &[
                &record.id,
                &record.display_name,
                &record.submitting_names,
                &record.parent_display_name,
                &record.ai_aliases,
                &record.industry,
                &record.region,
                &record.size,
                &cache,
                &normalized_name,
                &name_initials,
                &normalized_submitting,
                &normalized_aliases,
                &normalized_parent,
            ],
        )
        .await
        .with_context(|| format!("Failed to upsert company {}", record.id))?;
        Ok(())
    }

    pub async fn import(&self, records: &[CompanyRecord]) -> Result<usize> {
        for record in records {
            self.upsert_record(record).await?;
        }
        info!("Imported {} company records into PostgreSQL", records.len());
        Ok(records.len())
    }
}

/// SQL scoring expression for one clause; `$p` is the clause value.
fn clause_sql(kind: &ClauseKind, field: SearchField, p: usize, boost: f64) -> String {
    let boost = format!("{:.4}::float8", boost);
    let fuzzy = |column: &str| {
        format!(
            "GREATEST(similarity({col}, ${p}::text)::float8 - {floor}, 0) / {span} * {boost}",
            col = column,
            p = p,
            floor = TRIGRAM_FLOOR,
            span = 1.0 - TRIGRAM_FLOOR,
            boost = boost
        )
    };
    let array_fuzzy = |column: &str| {
        format!(
            "COALESCE((SELECT MAX(GREATEST(similarity(v, ${p}::text)::float8 - {floor}, 0)) FROM unnest({col}) v), 0) / {span} * {boost}",
            col = column,
            p = p,
            floor = TRIGRAM_FLOOR,
            span = 1.0 - TRIGRAM_FLOOR,
            boost = boost
        )
    };
    let when = |condition: String| format!("CASE WHEN {} THEN {} ELSE 0 END", condition, boost);

    match (kind, field) {
        (ClauseKind::Term, SearchField::DisplayName) => when(format!("normalized_name = ${}::text", p)),
        (ClauseKind::Term, SearchField::SubmittingNames) => {
            when(format!("${}::text = ANY(normalized_submitting_names)", p))
        }
        (ClauseKind::Term, SearchField::AiAliases) => {
            when(format!("${}::text = ANY(normalized_aliases)", p))
        }
        (ClauseKind::Term, SearchField::ParentName) => {
            when(format!("normalized_parent_name = ${}::text", p))
        }
        (ClauseKind::Phrase, SearchField::DisplayName) => {
            when(format!("strpos(lower(display_name), ${}::text) > 0", p))
        }
        (ClauseKind::Phrase, SearchField::ParentName) => {
            when(format!("strpos(lower(parent_display_name), ${}::text) > 0", p))
        }
        (ClauseKind::Phrase, SearchField::SubmittingNames) => when(format!(
            "EXISTS (SELECT 1 FROM unnest(submitting_names) v WHERE strpos(lower(v), ${}::text) > 0)",
            p
        )),
        (ClauseKind::Phrase, SearchField::AiAliases) => when(format!(
            "EXISTS (SELECT 1 FROM unnest(ai_aliases) v WHERE strpos(lower(v), ${}::text) > 0)",
            p
        )),
        (ClauseKind::Fuzzy { .. }, SearchField::DisplayName) => fuzzy("normalized_name"),
        (ClauseKind::Fuzzy { .. }, SearchField::ParentName) => fuzzy("normalized_parent_name"),
        (ClauseKind::Fuzzy { .. }, SearchField::SubmittingNames) => {
            array_fuzzy("normalized_submitting_names")
        }
        (ClauseKind::Fuzzy { .. }, SearchField::AiAliases) => array_fuzzy("normalized_aliases"),
        (ClauseKind::Wildcard, SearchField::DisplayName) => {
            when(format!("normalized_name LIKE ${}::text || '%'", p))
        }
        (ClauseKind::Wildcard, SearchField::ParentName) => {
            when(format!("normalized_parent_name LIKE ${}::text || '%'", p))
        }
        (ClauseKind::Wildcard, SearchField::SubmittingNames) => when(format!(
            "EXISTS (SELECT 1 FROM unnest(normalized_submitting_names) v WHERE v LIKE ${}::text || '%')",
            p
        )),
        (ClauseKind::Wildcard, SearchField::AiAliases) => when(format!(
            "EXISTS (SELECT 1 FROM unnest(normalized_aliases) v WHERE v LIKE ${}::text || '%')",
            p
        )),
        (ClauseKind::Acronym, _) => when(format!("name_initials = ${}::text", p)),
    }
}

/// Builds the ranked search statement. Clause values bind as `$1..$n`, the limit as `$n+1`.
pub fn build_search_sql(query: &CompanySearchQuery) -> String {
    let terms: Vec<String> = query
        .clauses
        .iter()
        .enumerate()
        .map(|(i, c)| clause_sql(&c.kind, c.field, i + 1, c.boost))
        .collect();
    let relevance = if terms.is_empty() {
        "0::float8".to_string()
    } else {
        terms.join("\n     + ")
    };
    format!(
        "SELECT * FROM (\n  SELECT {cols},\n    ({rel}) AS relevance\n  FROM company\n) scored\n\
         WHERE relevance > 0\nORDER BY relevance DESC, id\nLIMIT ${limit}",
        cols = RECORD_COLUMNS,
        rel = relevance,
        limit = query.clauses.len() + 1
    )
}

fn row_to_record(row: &Row) -> CompanyRecord {
    let id: String = row.get("id");
    let cache: Option<serde_json::Value> = row.get("exact_match_cache");
    let exact_match_cache = match cache {
        Some(value) => serde_json::from_value::<Vec<CacheEntry>>(value).unwrap_or_else(|e| {
            warn!("Ignoring unreadable exact-match cache on {}: {}", id, e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    CompanyRecord {
        display_name: row.get("display_name"),
        submitting_names: row
            .get::<_, Option<Vec<String>>>("submitting_names")
            .unwrap_or_default(),
        parent_display_name: row.get("parent_display_name"),
        ai_aliases: row.get::<_, Option<Vec<String>>>("ai_aliases").unwrap_or_default(),
        industry: row.get("industry"),
        region: row.get("region"),
        size: row.get("size"),
        exact_match_cache,
        id,
    }
}

#[async_trait]
impl SearchIndex for PgRegistry {
    async fn search(&self, query: &CompanySearchQuery, limit: usize) -> Result<Vec<MatchCandidate>> {
        let sql = build_search_sql(query);
        let limit = limit as i64;
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(query.clauses.len() + 1);
        for clause in &query.clauses {
            params.push(&clause.value);
        }
        params.push(&limit);

        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for company search")?;
        let rows = conn
            .query(sql.as_str(), &params[..])
            .await
            .with_context(|| format!("Company search failed for '{}'", query.text))?;
        debug!("Company search '{}' returned {} rows", query.text, rows.len());
        Ok(rows
            .iter()
            .map(|row| MatchCandidate {
                raw_relevance_score: row.get("relevance"),
                record: row_to_record(row),
            })
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CompanyRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for company fetch")?;
        let sql = format!("SELECT {} FROM company WHERE id = $1", RECORD_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&id])
            .await
            .with_context(|| format!("Failed to fetch company {}", id))?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn find_by_cache_entry(
        &self,
        normalized_query: &str,
        context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for cache lookup")?;
        let sql = format!(
            "SELECT {} FROM company
             WHERE exact_match_cache @> jsonb_build_array(jsonb_build_object('normalized_query', $1::text))
             ORDER BY id",
            RECORD_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&normalized_query])
            .await
            .context("Exact-match cache lookup query failed")?;
        Ok(rows
            .iter()
            .map(row_to_record)
            .filter(|r| {
                r.exact_match_cache
                    .iter()
                    .any(|e| e.matches(normalized_query, context_hash))
            })
            .collect())
    }

    async fn persist_cache_entries(&self, id: &str, entries: &[CacheEntry]) -> Result<()> {
        let value = serde_json::to_value(entries).context("Failed to serialize cache entries")?;
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for cache update")?;
        let updated = conn
            .execute(
                "UPDATE company SET exact_match_cache = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
                &[&id, &value],
            )
            .await
            .with_context(|| format!("Failed to persist cache entries for {}", id))?;
        if updated == 0 {
            anyhow::bail!("Company record {} not found", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_sql_binds_every_clause_and_the_limit() {
        let query = CompanySearchQuery::build("IBM");
        let sql = build_search_sql(&query);
        let n = query.clauses.len();
        assert!(sql.contains(&format!("${}", n)));
        assert!(sql.contains(&format!("LIMIT ${}", n + 1)));
        assert!(sql.contains("name_initials = $"));
        assert!(sql.contains("similarity(normalized_name, $"));
        assert!(sql.contains("= ANY(normalized_aliases)"));
        assert!(sql.contains("WHERE relevance > 0"));
    }

    #[test]
    fn test_clause_sql_casts_boost() {
        let sql = clause_sql(&ClauseKind::Term, SearchField::DisplayName, 3, 10.0);
        assert_eq!(sql, "CASE WHEN normalized_name = $3::text THEN 10.0000::float8 ELSE 0 END");
    }
}
