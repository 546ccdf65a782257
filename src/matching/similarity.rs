// src/matching/similarity.rs - String similarity signals between a query and a record
use strsim::{jaro_winkler, osa_distance, sorensen_dice};

use crate::matching::normalize::{generate_typo_variations, initials, normalize_company_name};
use crate::models::{CompanyRecord, MatchType};

pub const ABBREVIATION_BONUS: f64 = 0.85;
pub const TYPO_BONUS: f64 = 0.80;
pub const TYPO_VARIATION_BONUS: f64 = 0.90;

const MAX_ABBREVIATION_LEN: usize = 10;
const MIN_TYPO_LEN: usize = 4;

/// Which signal produced a similarity score. Ordered from least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimilarityKind {
    Bigram,
    Character,
    Typo,
    TypoVariation,
    Abbreviation,
    Exact,
}

impl SimilarityKind {
    pub fn match_type(self) -> MatchType {
        match self {
            SimilarityKind::Exact => MatchType::Exact,
            SimilarityKind::Abbreviation => MatchType::Abbreviation,
            SimilarityKind::Typo | SimilarityKind::TypoVariation => MatchType::Variation,
            SimilarityKind::Bigram | SimilarityKind::Character => MatchType::Fuzzy,
        }
    }

    fn is_specific(self) -> bool {
        !matches!(self, SimilarityKind::Bigram | SimilarityKind::Character)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameSimilarity {
    /// Maximum over every signal and every searchable name, in [0, 1].
    pub score: f64,
    /// The most specific signal that fired; falls back to whichever metric scored highest.
    pub kind: SimilarityKind,
}

impl NameSimilarity {
    const NONE: NameSimilarity = NameSimilarity {
        score: 0.0,
        kind: SimilarityKind::Bigram,
    };

    pub fn match_type(&self) -> MatchType {
        self.kind.match_type()
    }

    fn absorb(&mut self, score: f64, kind: SimilarityKind) {
        if score <= 0.0 {
            return;
        }
        let more_specific = kind.is_specific() && kind > self.kind;
        if score > self.score {
            if more_specific || !self.kind.is_specific() {
                self.kind = kind;
            }
            self.score = score;
        } else if more_specific {
            self.kind = kind;
        }
    }
}

/// Best similarity between a raw candidate name and any searchable name of `record`.
pub fn name_similarity(candidate: &str, record: &CompanyRecord) -> NameSimilarity {
    let candidate = candidate.trim();
    let candidate_norm = normalize_company_name(candidate);
    if candidate_norm.is_empty() {
        return NameSimilarity::NONE;
    }
    let candidate_variations = generate_typo_variations(&candidate_norm);

    let mut best = NameSimilarity::NONE;
    for name in record.searchable_names() {
        let name_norm = normalize_company_name(name);
        if name_norm.is_empty() {
            continue;
        }
        if candidate_norm == name_norm {
            return NameSimilarity {
                score: 1.0,
                kind: SimilarityKind::Exact,
            };
        }
        best.absorb(sorensen_dice(&candidate_norm, &name_norm), SimilarityKind::Bigram);
        best.absorb(jaro_winkler(candidate, name.trim()), SimilarityKind::Character);
        if is_plausible_abbreviation(candidate, name) {
            best.absorb(ABBREVIATION_BONUS, SimilarityKind::Abbreviation);
        }
        if looks_like_typo(&candidate_norm, &name_norm) {
            best.absorb(TYPO_BONUS, SimilarityKind::Typo);
        }
        if candidate_variations.contains(&name_norm) {
            best.absorb(TYPO_VARIATION_BONUS, SimilarityKind::TypoVariation);
        }
    }
    best.score = best.score.clamp(0.0, 1.0);
    best
}

/// A short, mostly-uppercase token whose letters follow the word initials (or, for
/// all-caps tickers, the letters) of a longer name: "IBM" / "I.B.M." for
/// "International Business Machines Corporation", "MSFT" for "Microsoft".
pub fn is_plausible_abbreviation(candidate: &str, full_name: &str) -> bool {
    let letters: String = candidate.chars().filter(|c| c.is_alphanumeric()).collect();
    let len = letters.chars().count();
    if len < 2 || len > MAX_ABBREVIATION_LEN || candidate.split_whitespace().count() > 1 {
        return false;
    }
    let alphabetic: Vec<char> = letters.chars().filter(|c| c.is_alphabetic()).collect();
    let uppercase = alphabetic.iter().filter(|c| c.is_uppercase()).count();
    let mostly_uppercase = !alphabetic.is_empty() && uppercase * 2 > alphabetic.len();
    if !mostly_uppercase && len > 5 {
        return false;
    }

    let abbreviation = letters.to_lowercase();
    let name_initials = initials(full_name);
    let compact: String = full_name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if compact.chars().count() <= len {
        return false;
    }
    let full_lower = full_name.to_lowercase();
    if full_lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == abbreviation)
    {
        // The candidate is one of the name's own words, not an abbreviation of it.
        return false;
    }
    if abbreviation.chars().next() != name_initials.chars().next() {
        return false;
    }
    is_subsequence(&abbreviation, &name_initials)
        || (mostly_uppercase && is_subsequence(&abbreviation, &compact))
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut remaining = haystack.chars();
    needle.chars().all(|c| remaining.any(|h| h == c))
}

/// One edit (two for longer names) away from a record name, ignoring very short names.
pub fn looks_like_typo(candidate_norm: &str, name_norm: &str) -> bool {
    if candidate_norm == name_norm {
        return false;
    }
    let longest = candidate_norm.chars().count().max(name_norm.chars().count());
    if candidate_norm.chars().count() < MIN_TYPO_LEN || name_norm.chars().count() < MIN_TYPO_LEN {
        return false;
    }
    let allowed = if longest >= 8 { 2 } else { 1 };
    osa_distance(candidate_norm, name_norm) <= allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_after_normalization() {
        let record = CompanyRecord::new("c1", "Acme Widgets, Inc.");
        let sim = name_similarity("ACME WIDGETS", &record);
        assert_eq!(sim.score, 1.0);
        assert_eq!(sim.match_type(), MatchType::Exact);
    }

    #[test]
    fn test_ibm_is_an_abbreviation() {
        let record = CompanyRecord::new("ibm", "International Business Machines Corporation");
        assert!(is_plausible_abbreviation("IBM", record.name()));
        assert!(is_plausible_abbreviation("I.B.M.", record.name()));
        let sim = name_similarity("IBM", &record);
        assert_eq!(sim.match_type(), MatchType::Abbreviation);
        assert!((sim.score - ABBREVIATION_BONUS).abs() < 1e-9);
    }

    #[test]
    fn test_abbreviation_rejections() {
        assert!(is_plausible_abbreviation("MSFT", "Microsoft"));
        assert!(!is_plausible_abbreviation("ACME", "Acme Widgets"));
        assert!(!is_plausible_abbreviation("XBM", "International Business Machines"));
        assert!(!is_plausible_abbreviation("Internatio", "International Business Machines"));
        assert!(!is_plausible_abbreviation("I B M", "International Business Machines"));
    }

    #[test]
    fn test_misspelling_is_labelled_variation() {
        let record = CompanyRecord::new("ms", "Microsoft Corporation");
        let sim = name_similarity("Microsfot", &record);
        assert_eq!(sim.match_type(), MatchType::Variation);
        assert!(sim.score >= TYPO_VARIATION_BONUS);
    }

    #[test]
    fn test_alternate_names_count_but_parent_does_not() {
        let mut record = CompanyRecord::new("c1", "Alphabet Inc");
        record.parent_display_name = Some("Google Holdings".to_string());
        assert!(name_similarity("Google Holdings", &record).score < 0.9);

        record.ai_aliases.push("Google".to_string());
        assert_eq!(name_similarity("Google", &record).score, 1.0);
    }

    #[test]
    fn test_typo_detector_bounds() {
        assert!(looks_like_typo("acme", "acne"));
        assert!(!looks_like_typo("acm", "acn"));
        assert!(looks_like_typo("internationl", "international"));
        assert!(!looks_like_typo("acme", "acme"));
        assert!(!looks_like_typo("acme", "apex"));
    }

    #[test]
    fn test_unrelated_names_score_low() {
        let record = CompanyRecord::new("c1", "Globex Corporation");
        let sim = name_similarity("Initech", &record);
        assert!(sim.score < 0.7);
        assert_eq!(sim.match_type(), MatchType::Fuzzy);
    }
}
