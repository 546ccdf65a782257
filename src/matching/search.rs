// src/matching/search.rs - Search index collaborator and the multi-clause company query
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::matching::normalize::normalize_company_name;
use crate::models::{CacheEntry, CompanyRecord, MatchCandidate};

/// Registry fields a clause can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    DisplayName,
    SubmittingNames,
    ParentName,
    AiAliases,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::DisplayName => "display_name",
            SearchField::SubmittingNames => "submitting_names",
            SearchField::ParentName => "parent_display_name",
            SearchField::AiAliases => "ai_aliases",
        }
    }

    /// Values of this field on a record.
    pub fn values<'a>(&self, record: &'a CompanyRecord) -> Vec<&'a str> {
        match self {
            SearchField::DisplayName => record.display_name.as_deref().into_iter().collect(),
            SearchField::SubmittingNames => {
                record.submitting_names.iter().map(String::as_str).collect()
            }
            SearchField::ParentName => record.parent_display_name.as_deref().into_iter().collect(),
            SearchField::AiAliases => record.ai_aliases.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    /// Normalized value equals the normalized term.
    Term,
    /// Value contains the phrase (case-insensitive).
    Phrase,
    /// Normalized value within `max_edits` of the term.
    Fuzzy { max_edits: usize },
    /// Normalized value starts with the term.
    Wildcard,
    /// Term equals the initials of the value.
    Acronym,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchClause {
    pub kind: ClauseKind,
    pub field: SearchField,
    pub value: String,
    pub boost: f64,
}

impl fmt::Display for SearchClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ClauseKind::Term => "term".to_string(),
            ClauseKind::Phrase => "phrase".to_string(),
            ClauseKind::Fuzzy { max_edits } => format!("fuzzy~{}", max_edits),
            ClauseKind::Wildcard => "wildcard".to_string(),
            ClauseKind::Acronym => "acronym".to_string(),
        };
        write!(f, "{}:{}:'{}'^{}", kind, self.field.as_str(), self.value, self.boost)
    }
}

/// One disjunctive query: a record's relevance is the sum of the boosts of the clauses it
/// satisfies.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanySearchQuery {
    pub text: String,
    pub normalized: String,
    pub clauses: Vec<SearchClause>,
}

impl CompanySearchQuery {
    pub fn build(text: &str) -> Self {
        let text = text.trim().to_string();
        let normalized = normalize_company_name(&text);
        let phrase = text.to_lowercase();
        let max_edits = if normalized.chars().count() < 6 { 1 } else { 2 };

        let mut clauses = Vec::new();
        let mut push = |kind: ClauseKind, field: SearchField, value: &str, boost: f64| {
            if !value.is_empty() {
                clauses.push(SearchClause {
                    kind,
                    field,
                    value: value.to_string(),
                    boost,
                });
            }
        };

        push(ClauseKind::Term, SearchField::DisplayName, &normalized, 10.0);
        push(ClauseKind::Phrase, SearchField::DisplayName, &phrase, 5.0);
        push(ClauseKind::Fuzzy { max_edits }, SearchField::DisplayName, &normalized, 3.0);
        push(ClauseKind::Wildcard, SearchField::DisplayName, &normalized, 2.0);

        let compact: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
        if !compact.is_empty() && compact.chars().count() <= 10 && !text.contains(' ') {
            push(ClauseKind::Acronym, SearchField::DisplayName, &compact.to_lowercase(), 4.0);
        }

        push(ClauseKind::Term, SearchField::SubmittingNames, &normalized, 6.0);
        push(ClauseKind::Fuzzy { max_edits }, SearchField::SubmittingNames, &normalized, 2.0);
        push(ClauseKind::Term, SearchField::AiAliases, &normalized, 6.0);
        push(ClauseKind::Fuzzy { max_edits }, SearchField::AiAliases, &normalized, 1.5);
        push(ClauseKind::Term, SearchField::ParentName, &normalized, 1.0);

        Self {
            text,
            normalized,
            clauses,
        }
    }

    pub fn describe(&self) -> String {
        self.clauses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// The registry's search and cache-persistence surface. Implementations return every
/// matching record, including ones without a display name; callers filter those.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Records satisfying at least one clause, highest relevance first, at most `limit`.
    async fn search(&self, query: &CompanySearchQuery, limit: usize) -> Result<Vec<MatchCandidate>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<CompanyRecord>>;

    /// Records holding a cache entry for `normalized_query` scoped to `context_hash`
    /// (entries stored without a hash match any context).
    async fn find_by_cache_entry(
        &self,
        normalized_query: &str,
        context_hash: Option<&str>,
    ) -> Result<Vec<CompanyRecord>>;

    /// Replaces the embedded cache of record `id`.
    async fn persist_cache_entries(&self, id: &str, entries: &[CacheEntry]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_covers_every_clause_kind_and_field() {
        let query = CompanySearchQuery::build("IBM");
        assert_eq!(query.normalized, "ibm");
        let kinds: Vec<&ClauseKind> = query.clauses.iter().map(|c| &c.kind).collect();
        assert!(kinds.contains(&&ClauseKind::Term));
        assert!(kinds.contains(&&ClauseKind::Phrase));
        assert!(kinds.contains(&&ClauseKind::Wildcard));
        assert!(kinds.contains(&&ClauseKind::Acronym));
        assert!(kinds.contains(&&ClauseKind::Fuzzy { max_edits: 1 }));
        for field in [
            SearchField::DisplayName,
            SearchField::SubmittingNames,
            SearchField::ParentName,
            SearchField::AiAliases,
        ] {
            assert!(query.clauses.iter().any(|c| c.field == field));
        }
    }

    #[test]
    fn test_multi_word_names_skip_acronym_clause() {
        let query = CompanySearchQuery::build("Acme Widgets Incorporated");
        assert_eq!(query.normalized, "acme widgets");
        assert!(query.clauses.iter().all(|c| c.kind != ClauseKind::Acronym));
        assert!(query.describe().starts_with("term:display_name:'acme widgets'^10"));
    }

    #[test]
    fn test_field_values() {
        let mut record = CompanyRecord::new("c1", "Acme");
        record.submitting_names = vec!["ACME Co".to_string(), "Acme Intl".to_string()];
        assert_eq!(SearchField::SubmittingNames.values(&record).len(), 2);
        assert!(SearchField::ParentName.values(&record).is_empty());
    }
}
