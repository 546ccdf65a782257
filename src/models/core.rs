// src/models/core.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a query was tied to a registry entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Abbreviation,
    Variation,
    Semantic,
    Fuzzy,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Abbreviation => "abbreviation",
            MatchType::Variation => "variation",
            MatchType::Semantic => "semantic",
            MatchType::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional disambiguating hints supplied alongside a company name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl CompanyContext {
    pub fn industry(industry: &str) -> Self {
        Self {
            industry: Some(industry.to_string()),
            ..Default::default()
        }
    }

    /// True when no field carries a non-blank value.
    pub fn is_empty(&self) -> bool {
        [&self.industry, &self.region, &self.size]
            .iter()
            .all(|f| f.as_deref().map_or(true, |v| v.trim().is_empty()))
    }

    /// Pairs of (field name, supplied value) for the non-blank fields.
    pub fn supplied_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = Vec::new();
        for (name, value) in [
            ("industry", &self.industry),
            ("region", &self.region),
            ("size", &self.size),
        ] {
            if let Some(v) = value.as_deref() {
                if !v.trim().is_empty() {
                    fields.push((name, v));
                }
            }
        }
        fields
    }
}

/// One remembered query → entity mapping, embedded in its `CompanyRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: String,
    pub normalized_query: String,
    pub confidence: f64,
    pub match_count: u32,
    pub last_matched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hash: Option<String>,
    pub match_type: MatchType,
}

impl CacheEntry {
    /// An entry without a context hash predates context scoping and matches any context.
    pub fn matches(&self, normalized_query: &str, context_hash: Option<&str>) -> bool {
        if self.normalized_query != normalized_query {
            return false;
        }
        match (&self.context_hash, context_hash) {
            (None, _) => true,
            (Some(stored), Some(wanted)) => stored == wanted,
            (Some(_), None) => false,
        }
    }
}

/// A registry entity. Created and removed by the external registry; this crate only
/// mutates `exact_match_cache`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub submitting_names: Vec<String>,
    #[serde(default)]
    pub parent_display_name: Option<String>,
    #[serde(default)]
    pub ai_aliases: Vec<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub exact_match_cache: Vec<CacheEntry>,
}

impl CompanyRecord {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: Some(display_name.to_string()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or_default()
    }

    pub fn has_display_name(&self) -> bool {
        self.display_name
            .as_deref()
            .map_or(false, |n| !n.trim().is_empty())
    }

    /// Display name followed by submitting names and AI aliases. The parent name is
    /// deliberately absent: matching it identifies the parent, not this record.
    pub fn searchable_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(1 + self.submitting_names.len() + self.ai_aliases.len());
        if let Some(n) = self.display_name.as_deref() {
            names.push(n);
        }
        names.extend(self.submitting_names.iter().map(String::as_str));
        names.extend(self.ai_aliases.iter().map(String::as_str));
        names.retain(|n| !n.trim().is_empty());
        names
    }

    pub fn attribute(&self, field: &str) -> Option<&str> {
        match field {
            "industry" => self.industry.as_deref(),
            "region" => self.region.as_deref(),
            "size" => self.size.as_deref(),
            _ => None,
        }
    }
}
