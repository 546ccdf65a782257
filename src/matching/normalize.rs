// src/matching/normalize.rs - Company name normalization and deterministic rewrites
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const MAX_NORMALIZATION_PASSES: usize = 16;
const MAX_TYPO_VARIATION_INPUT: usize = 40;

const CHAR_SUBSTITUTIONS: [(&str, &str); 10] = [
    ("&", " and "),
    ("+", " plus "),
    ("/", " "),
    ("-", " "),
    (".", " "),
    ("'", ""),
    ("’", ""),
    ("(", " "),
    (")", " "),
    (",", " "),
];

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Legal-form and grouping words stripped from the end of a normalized name,
/// longest first so compound forms go before their tails.
const LEGAL_SUFFIXES: [&str; 27] = [
    " limited liability company",
    " limited partnership",
    " and company",
    " incorporated",
    " corporation",
    " and co",
    " holdings",
    " company",
    " limited",
    " group",
    " gmbh",
    " corp",
    " sarl",
    " inc",
    " ltd",
    " llc",
    " llp",
    " plc",
    " pty",
    " spa",
    " co",
    " lp",
    " ag",
    " sa",
    " nv",
    " bv",
    " se",
];

static ABBREVIATION_EXPANSIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\b(intl|intnl)\b", "international"),
        (r"\b(natl)\b", "national"),
        (r"\b(mfg)\b", "manufacturing"),
        (r"\b(assoc|assn)\b", "association"),
        (r"\b(dept|dpt)\b", "department"),
        (r"\b(univ)\b", "university"),
        (r"\b(bros)\b", "brothers"),
        (r"\b(svcs|svc)\b", "services"),
        (r"\b(hldgs|hldg)\b", "holdings"),
        (r"\b(mgmt)\b", "management"),
        (r"\b(ctr|cntr)\b", "center"),
        (r"\b(sys)\b", "systems"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Normalizes a company name: case-folding, punctuation and legal-suffix stripping,
/// abbreviation expansion and whitespace collapsing. Repeats until the result is
/// stable, so `normalize_company_name(normalize_company_name(s)) == normalize_company_name(s)`.
pub fn normalize_company_name(name: &str) -> String {
    let mut current = normalize_once(name);
    for _ in 0..MAX_NORMALIZATION_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(name: &str) -> String {
    let mut normalized = name.to_lowercase();
    for (pattern, replacement) in &CHAR_SUBSTITUTIONS {
        normalized = normalized.replace(pattern, replacement);
    }
    normalized = collapse_whitespace(&normalized);
    normalized = join_single_letters(&normalized);

    for article in LEADING_ARTICLES {
        if let Some(rest) = normalized.strip_prefix(article) {
            if !rest.trim().is_empty() {
                normalized = rest.to_string();
            }
        }
    }

    loop {
        let before = normalized.len();
        for suffix in LEGAL_SUFFIXES {
            if let Some(stripped) = normalized.strip_suffix(suffix) {
                if !stripped.trim().is_empty() {
                    normalized = stripped.trim_end().to_string();
                }
            }
        }
        if normalized.len() == before {
            break;
        }
    }

    for (re, replacement) in ABBREVIATION_EXPANSIONS.iter() {
        normalized = re.replace_all(&normalized, *replacement).into_owned();
    }

    normalized = normalized
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    collapse_whitespace(&normalized)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "i b m corp" → "ibm corp": runs of two or more single letters are dotted initials.
fn join_single_letters(s: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut run = String::new();
    for token in s.split_whitespace() {
        let mut chars = token.chars();
        let single_letter =
            matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic());
        if single_letter {
            run.push_str(token);
        } else {
            if !run.is_empty() {
                out.push(std::mem::take(&mut run));
            }
            out.push(token.to_string());
        }
    }
    if !run.is_empty() {
        out.push(run);
    }
    out.join(" ")
}

/// Key used by the per-call search history: lowercase, trimmed, single-spaced.
pub fn history_key(query: &str) -> String {
    collapse_whitespace(&query.trim().to_lowercase())
}

/// Lowercase initials of every alphanumeric word: "International Business Machines
/// Corporation" → "ibmc".
pub fn initials(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

static RAW_LEGAL_SUFFIX: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)[\s,]+(incorporated|inc\.?|corporation|corp\.?|company|co\.?|limited|ltd\.?|l\.?l\.?c\.?|plc|gmbh|ag|s\.?a\.?|n\.?v\.?|b\.?v\.?|holdings)\s*$",
    )
    .ok()
});

/// Removes one trailing legal form from a raw name, keeping the caller's casing.
pub fn strip_legal_suffix(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = RAW_LEGAL_SUFFIX.as_ref()?.replace(trimmed, "").trim().to_string();
    if stripped.is_empty() || stripped == trimmed {
        None
    } else {
        Some(stripped)
    }
}

/// Query-rewriting variants, most promising first: suffix stripped, ampersand swapped,
/// then common legal forms appended. Never includes the input itself.
pub fn generate_query_variants(raw: &str, max: usize) -> Vec<String> {
    let trimmed = raw.trim();
    let base = strip_legal_suffix(trimmed).unwrap_or_else(|| trimmed.to_string());

    let mut candidates = vec![base.clone()];
    if base.contains('&') {
        candidates.push(collapse_whitespace(&base.replace('&', " and ")));
    } else if base.to_lowercase().contains(" and ") {
        candidates.push(replace_ignore_case(&base, " and ", " & "));
    }
    for form in ["Inc", "Corporation", "Ltd", "LLC"] {
        candidates.push(format!("{} {}", base, form));
    }

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(history_key(trimmed));
    candidates
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .filter(|c| seen.insert(history_key(c)))
        .take(max)
        .collect()
}

fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower = haystack.to_lowercase();
    match lower.find(needle) {
        Some(idx) if lower.len() == haystack.len() => format!(
            "{}{}{}",
            &haystack[..idx],
            replacement,
            &haystack[idx + needle.len()..]
        ),
        _ => haystack.to_string(),
    }
}

const COMMON_MISSPELLINGS: [(&str, &str); 24] = [
    ("corportion", "corporation"),
    ("coporation", "corporation"),
    ("corporaton", "corporation"),
    ("corpration", "corporation"),
    ("compnay", "company"),
    ("comapny", "company"),
    ("copmany", "company"),
    ("internatonal", "international"),
    ("internationl", "international"),
    ("interntional", "international"),
    ("technolgies", "technologies"),
    ("technoligies", "technologies"),
    ("tecnologies", "technologies"),
    ("technolgy", "technology"),
    ("sytems", "systems"),
    ("systmes", "systems"),
    ("holdngs", "holdings"),
    ("hodlings", "holdings"),
    ("limted", "limited"),
    ("limitd", "limited"),
    ("industires", "industries"),
    ("insurnace", "insurance"),
    ("pharmacueticals", "pharmaceuticals"),
    ("manufacuring", "manufacturing"),
];

/// Deterministic correction of common corporate-word misspellings and runs of three or
/// more repeated letters. `None` when nothing changed.
pub fn correct_common_typos(raw: &str) -> Option<String> {
    let corrected_words: Vec<String> = raw
        .split_whitespace()
        .map(|word| {
            let collapsed = collapse_letter_runs(word);
            let lower = collapsed.to_lowercase();
            match COMMON_MISSPELLINGS.iter().find(|(wrong, _)| *wrong == lower) {
                Some((_, right)) => match_case(&collapsed, right),
                None => collapsed,
            }
        })
        .collect();
    let corrected = corrected_words.join(" ");
    if corrected == collapse_whitespace(raw) {
        None
    } else {
        Some(corrected)
    }
}

fn collapse_letter_runs(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut last: Option<char> = None;
    let mut run = 0;
    for c in word.chars() {
        if Some(c.to_ascii_lowercase()) == last.map(|l| l.to_ascii_lowercase()) {
            run += 1;
        } else {
            run = 1;
        }
        last = Some(c);
        if run <= 2 {
            out.push(c);
        }
    }
    out
}

fn match_case(original: &str, replacement: &str) -> String {
    if original.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()) {
        replacement.to_uppercase()
    } else if original.chars().next().map_or(false, char::is_uppercase) {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        replacement.to_string()
    }
}

/// Single-edit typo variations of a normalized name: adjacent transpositions, single
/// deletions and doubled-letter collapses. Empty for long inputs to bound the cost.
pub fn generate_typo_variations(normalized: &str) -> HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    let mut variations = HashSet::new();
    if chars.len() < 2 || chars.len() > MAX_TYPO_VARIATION_INPUT {
        return variations;
    }
    for i in 0..chars.len() - 1 {
        if chars[i] != chars[i + 1] {
            let mut swapped = chars.clone();
            swapped.swap(i, i + 1);
            variations.insert(swapped.into_iter().collect());
        } else {
            let mut collapsed = chars.clone();
            collapsed.remove(i);
            variations.insert(collapsed.into_iter().collect());
        }
    }
    for i in 0..chars.len() {
        let mut deleted = chars.clone();
        deleted.remove(i);
        variations.insert(deleted.into_iter().collect());
    }
    variations.remove(normalized);
    variations
}

static SUBSIDIARY_PATTERNS: Lazy<Vec<(Regex, usize)>> = Lazy::new(|| {
    [
        (
            r"(?i)^(.+?),?\s+(?:a\s+)?(?:wholly[- ]owned\s+)?(?:subsidiary|division|unit|affiliate)\s+of\s+(.+)$",
            2,
        ),
        (r"(?i)^(.+?)\s*\(\s*an?\s+(.+?)\s+company\s*\)$", 2),
        (r"(?i)^(.+?),?\s+(?:a\s+)?part\s+of\s+(.+)$", 2),
        (
            r"(?i)^(.+?)\s+[-–]\s+(.+?)\s+(?:division|unit|branch|subsidiary)$",
            1,
        ),
        (
            r"(?i)^(.+?)\s+(?:uk|usa|us|germany|deutschland|france|japan|china|india|canada|australia|europe|asia|emea|americas|north america|latin america)(?:\s+(?:inc|ltd|llc|gmbh|sa|ag|plc|bv|nv|pty|co|corp|limited)\.?)?$",
            1,
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, group)| Regex::new(pattern).ok().map(|re| (re, group)))
    .collect()
});

/// Parent-company names suggested by subsidiary phrasing in the raw name
/// ("X, a subsidiary of Y", "X (a Y company)", "Acme Germany GmbH").
pub fn detect_subsidiary_parents(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let own_key = history_key(trimmed);
    let mut seen = HashSet::new();
    let mut parents = Vec::new();
    for (re, group) in SUBSIDIARY_PATTERNS.iter() {
        if let Some(captures) = re.captures(trimmed) {
            if let Some(m) = captures.get(*group) {
                let parent = m.as_str().trim().trim_end_matches(',').trim().to_string();
                let key = history_key(&parent);
                if !parent.is_empty() && key != own_key && seen.insert(key) {
                    parents.push(parent);
                }
            }
        }
    }
    parents
}

/// Current and former names stated explicitly in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalSplit {
    pub current: String,
    pub former: String,
}

static FORMERLY_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(.+?)\s*[\(,]?\s*\b(?:formerly(?:\s+known\s+as)?|f/k/a|fka|previously(?:\s+known\s+as)?|n[ée]e)\s+(.+?)\s*\)?$",
    )
    .ok()
});

static NOW_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^(.+?)\s*[\(,]\s*now(?:\s+known\s+as)?\s+(.+?)\s*\)?$").ok()
});

/// Splits "X (formerly Y)" / "X f/k/a Y" / "Y (now X)" into current and former names.
pub fn split_historical_name(raw: &str) -> Option<HistoricalSplit> {
    let trimmed = raw.trim();
    if let Some(c) = FORMERLY_PATTERN.as_ref().and_then(|re| re.captures(trimmed)) {
        return Some(HistoricalSplit {
            current: c.get(1)?.as_str().trim().to_string(),
            former: c.get(2)?.as_str().trim().to_string(),
        });
    }
    if let Some(c) = NOW_PATTERN.as_ref().and_then(|re| re.captures(trimmed)) {
        return Some(HistoricalSplit {
            current: c.get(2)?.as_str().trim().to_string(),
            former: c.get(1)?.as_str().trim().to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_legal_forms_and_punctuation() {
        assert_eq!(normalize_company_name("Acme Inc."), "acme");
        assert_eq!(normalize_company_name("  The ACME Corporation, Ltd "), "acme");
        assert_eq!(normalize_company_name("AT&T Inc"), "at and t");
        assert_eq!(normalize_company_name("I.B.M. Corp"), "ibm");
        assert_eq!(normalize_company_name("Acme Intl Hldgs"), "acme international");
    }

    #[test]
    fn test_every_pattern_compiles() {
        assert!(RAW_LEGAL_SUFFIX.is_some());
        assert!(FORMERLY_PATTERN.is_some());
        assert!(NOW_PATTERN.is_some());
        assert_eq!(ABBREVIATION_EXPANSIONS.len(), 12);
        assert_eq!(SUBSIDIARY_PATTERNS.len(), 5);
    }

    #[test]
    fn test_normalize_never_empties_a_name() {
        assert_eq!(normalize_company_name("The Company"), "company");
        assert_eq!(normalize_company_name("Inc"), "inc");
        assert_eq!(normalize_company_name(""), "");
    }

    #[test]
    fn test_history_key() {
        assert_eq!(history_key("  Acme   Widgets "), "acme widgets");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("International Business Machines Corporation"), "ibmc");
        assert_eq!(initials("Bank of America"), "boa");
    }

    #[test]
    fn test_strip_legal_suffix_keeps_casing() {
        assert_eq!(strip_legal_suffix("Acme Widgets, Inc."), Some("Acme Widgets".to_string()));
        assert_eq!(strip_legal_suffix("Acme Widgets"), None);
        assert_eq!(strip_legal_suffix("Inc"), None);
    }

    #[test]
    fn test_query_variants_exclude_input_and_dedupe() {
        let variants = generate_query_variants("Acme Widgets Inc", 3);
        assert_eq!(variants[0], "Acme Widgets");
        assert!(variants.iter().all(|v| v != "Acme Widgets Inc"));
        assert_eq!(variants.len(), 3);

        let ampersand = generate_query_variants("Johnson & Johnson", 2);
        assert_eq!(ampersand, vec!["Johnson and Johnson", "Johnson & Johnson Inc"]);
    }

    #[test]
    fn test_correct_common_typos() {
        assert_eq!(
            correct_common_typos("Acme Corportion"),
            Some("Acme Corporation".to_string())
        );
        assert_eq!(
            correct_common_typos("ACME SYTEMS"),
            Some("ACME SYSTEMS".to_string())
        );
        assert_eq!(correct_common_typos("Acmmme"), Some("Acmme".to_string()));
        assert_eq!(correct_common_typos("Acme Corporation"), None);
    }

    #[test]
    fn test_typo_variations_cover_transposition_and_deletion() {
        let variations = generate_typo_variations("microsfot");
        assert!(variations.contains("microsoft"));
        let doubled = generate_typo_variations("googgle");
        assert!(doubled.contains("google"));
        assert!(!variations.contains("microsfot"));
        assert!(generate_typo_variations(&"a".repeat(41)).is_empty());
    }

    #[test]
    fn test_detect_subsidiary_parents() {
        assert_eq!(
            detect_subsidiary_parents("Widget Works, a subsidiary of Acme Holdings"),
            vec!["Acme Holdings"]
        );
        assert_eq!(
            detect_subsidiary_parents("Jeep (a Stellantis company)"),
            vec!["Stellantis"]
        );
        assert_eq!(detect_subsidiary_parents("Siemens Germany GmbH"), vec!["Siemens"]);
        assert!(detect_subsidiary_parents("Acme Widgets").is_empty());
    }

    #[test]
    fn test_split_historical_name() {
        assert_eq!(
            split_historical_name("Accenture (formerly Andersen Consulting)"),
            Some(HistoricalSplit {
                current: "Accenture".to_string(),
                former: "Andersen Consulting".to_string(),
            })
        );
        assert_eq!(
            split_historical_name("Andersen Consulting (now Accenture)"),
            Some(HistoricalSplit {
                current: "Accenture".to_string(),
                former: "Andersen Consulting".to_string(),
            })
        );
        assert_eq!(split_historical_name("Acme Widgets"), None);
    }

    proptest! {
        #[test]
        fn proptest_normalization_is_idempotent(name in "[A-Za-z0-9 &.,'()/-]{0,40}") {
            let once = normalize_company_name(&name);
            prop_assert_eq!(normalize_company_name(&once), once);
        }

        #[test]
        fn proptest_history_key_is_idempotent(name in "[A-Za-z0-9 ]{0,30}") {
            let once = history_key(&name);
            prop_assert_eq!(history_key(&once), once);
        }
    }
}
