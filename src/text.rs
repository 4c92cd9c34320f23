//! Text normalisation and comparison helpers shared by every pipeline stage.
//!
//! All comparisons in the pipeline go through these functions so that a
//! single notion of "same value" holds across extraction, consensus voting,
//! verification and correction.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Name suffixes that survive initialisation ("J. Smith, Jr.").
const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

pub const MONTH_NAMES: &[&str] = &[
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Collapse internal whitespace and trim.
pub fn normalize_text(x: &str) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WS_RE.replace_all(x.trim(), " ").into_owned()
}

/// Lowercase, strip punctuation, collapse whitespace. Comparison form only;
/// never shown to the user.
pub fn norm_for_compare(x: &str) -> String {
    static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
    let s = normalize_text(x).to_lowercase();
    let s = PUNCT_RE.replace_all(&s, " ");
    normalize_text(&s)
}

/// Token-sort similarity in [0, 1]. Tokens are sorted before the edit
/// distance so word order does not count against a match, the same
/// behaviour as a token-sort ratio.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let a = norm_for_compare(a);
    let b = norm_for_compare(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut ta: Vec<&str> = a.split_whitespace().collect();
    let mut tb: Vec<&str> = b.split_whitespace().collect();
    ta.sort_unstable();
    tb.sort_unstable();
    strsim::normalized_levenshtein(&ta.join(" "), &tb.join(" "))
}

/// Split a free-form author string into individual names.
pub fn authors_to_list(a: &str) -> Vec<String> {
    static SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*|\s+&\s+|\s+and\s+").unwrap());
    SPLIT_RE
        .split(a)
        .map(normalize_text)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_suffix_token(t: &str) -> bool {
    SUFFIXES.contains(&t.trim_end_matches('.').to_lowercase().as_str())
}

fn initials(given: &str) -> Vec<String> {
    static INITIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]\.$").unwrap());
    let mut out = Vec::new();
    for p in given.split_whitespace() {
        let hy: Vec<&str> = p.split('-').filter(|h| !h.is_empty()).collect();
        if hy.len() > 1 {
            out.push(
                hy.iter()
                    .map(|h| format!("{}.", first_upper(h)))
                    .collect::<Vec<_>>()
                    .join("-"),
            );
        } else if INITIAL_RE.is_match(p) {
            out.push(p.to_uppercase());
        } else if is_suffix_token(p) {
            out.push(format!("{}.", capitalize(p.trim_end_matches('.'))));
        } else {
            out.push(format!("{}.", first_upper(p)));
        }
    }
    out
}

fn first_upper(s: &str) -> String {
    s.chars()
        .next()
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_default()
}

fn capitalize(s: &str) -> String {
    let mut cs = s.chars();
    match cs.next() {
        Some(c) => c.to_uppercase().collect::<String>() + &cs.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// "Kaiming He" -> "K. He"; "He, Kaiming" -> "K. He"; suffixes kept.
pub fn format_author_ieee(name: &str) -> String {
    let n = normalize_text(name);
    if n.is_empty() {
        return String::new();
    }
    let (last, given) = if let Some((l, g)) = n.split_once(',') {
        (l.trim().to_string(), g.trim().to_string())
    } else {
        let mut toks: Vec<&str> = n.split_whitespace().collect();
        if toks.len() == 1 {
            return toks[0].to_string();
        }
        // A trailing suffix ("Jr.") is not the surname; keep it attached.
        let mut last = toks.pop().unwrap_or_default().to_string();
        if is_suffix_token(&last) && toks.len() >= 2 {
            last = format!("{} {}", toks.pop().unwrap_or_default(), last);
        }
        (last, toks.join(" "))
    };
    let init = initials(&given).join(" ");
    let last_tokens: Vec<&str> = last.split_whitespace().collect();
    if let Some(tail) = last_tokens.last()
        && is_suffix_token(tail)
        && last_tokens.len() >= 2
    {
        let suf = format!("{}.", capitalize(tail.trim_end_matches('.')));
        let last = last_tokens[..last_tokens.len() - 1].join(" ");
        return format!("{init} {last}, {suf}").trim().to_string();
    }
    format!("{init} {last}").trim().to_string()
}

/// IEEE author list: all authors up to six, then first six plus "et al."
pub fn format_authors_ieee_list(auths: &[String]) -> String {
    let items: Vec<String> = auths
        .iter()
        .map(|a| format_author_ieee(a))
        .filter(|a| !a.is_empty())
        .collect();
    match items.len() {
        0 => String::new(),
        1 => items[0].clone(),
        2..=6 => format!(
            "{}, and {}",
            items[..items.len() - 1].join(", "),
            items[items.len() - 1]
        ),
        _ => format!("{}, et al.", items[..6].join(", ")),
    }
}

/// Canonical "initials surname" comparison form for one author, lowercased.
/// Drops "et al." fragments entirely.
pub fn normalize_author_name(author: &str) -> String {
    let parts: Vec<&str> = author.split_whitespace().collect();
    let Some(&last) = parts.last() else {
        return String::new();
    };
    if matches!(last.to_lowercase().as_str(), "al." | "al" | "et" | "et.") {
        return String::new();
    }
    let mut out: Vec<String> = parts[..parts.len() - 1]
        .iter()
        .filter(|p| {
            p.chars().next().is_some_and(|c| c.is_alphabetic())
                && (p.chars().count() == 1 || p.ends_with('.'))
        })
        .map(|p| p.to_string())
        .collect();
    if last.chars().next().is_some_and(|c| c.is_alphabetic()) {
        out.push(last.to_string());
    }
    out.join(" ").to_lowercase().trim().to_string()
}

/// Comparison key for a whole author list; lists are voted and compared as
/// tuples, never per element.
pub fn normalize_author_list(authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .map(|a| normalize_author_name(a))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Lowercased surname, for overlap checks.
pub fn last_name(author: &str) -> Option<String> {
    author
        .split_whitespace()
        .last()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Lowercase everything past the first word, preserving "IEEE".
pub fn sentence_case(title: &str) -> String {
    static IEEE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bieee\b").unwrap());
    let t = normalize_text(title);
    if t.is_empty() {
        return String::new();
    }
    let t = if t.chars().all(|c| !c.is_lowercase()) {
        t.to_lowercase()
    } else {
        t
    };
    let mut out = Vec::new();
    for (i, tok) in t.split_whitespace().enumerate() {
        if i == 0 {
            let mut cs = tok.chars();
            match cs.next() {
                Some(c) => out.push(c.to_uppercase().collect::<String>() + &cs.as_str().to_lowercase()),
                None => out.push(String::new()),
            }
        } else {
            out.push(tok.to_lowercase());
        }
    }
    IEEE_RE.replace_all(&out.join(" "), "IEEE").into_owned()
}

/// Rough venue abbreviation when no source supplies one.
pub fn heuristic_abbrev(fullname: &str) -> String {
    const STOP: &[&str] = &["on", "of", "and", "the", "in", "for", "to"];
    let fullname = normalize_text(fullname);
    if fullname.is_empty() {
        return String::new();
    }
    let mut out = Vec::new();
    for t in fullname
        .split([' ', ','])
        .filter(|t| !t.is_empty() && !STOP.contains(&t.to_lowercase().as_str()))
        .take(8)
    {
        if t.len() <= 4 && t.chars().all(|c| c.is_uppercase()) {
            out.push(t.to_string());
        } else if t.len() <= 3 {
            out.push(format!("{}.", capitalize(t)));
        } else {
            out.push(format!("{}.", capitalize(&t.chars().take(4).collect::<String>())));
        }
    }
    out.join(" ")
}

/// Canonical lowercase DOI with textual prefixes removed.
pub fn normalize_doi(doi: &str) -> String {
    let mut d = normalize_text(doi).to_lowercase();
    for p in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(rest) = d.strip_prefix(p) {
            d = rest.trim_start().to_string();
        }
    }
    d
}

pub fn format_doi_link(doi: &str) -> String {
    let d = normalize_doi(doi);
    if d.is_empty() {
        String::new()
    } else {
        format!("https://doi.org/{d}")
    }
}

/// Normalise dashes; second value is true for a single page / article number.
pub fn normalize_pages(p: &str) -> (String, bool) {
    static ELOC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]?\d+[A-Za-z]?$").unwrap());
    let p = normalize_text(p).replace(['\u{2014}', '\u{2013}'], "-");
    if p.is_empty() {
        return (String::new(), false);
    }
    if !p.contains('-') && ELOC_RE.is_match(&p) {
        return (p, true);
    }
    (p, false)
}

/// True two-number range "start-end" with end > start.
pub fn page_range(p: &str) -> Option<(u64, u64)> {
    let (p, _) = normalize_pages(p);
    let (a, b) = p.split_once('-')?;
    let start: u64 = a.trim().parse().ok()?;
    let end: u64 = b.trim().parse().ok()?;
    (end > start).then_some((start, end))
}

/// Canonical month: numeric string "1".."12". Names, abbreviations and
/// zero-padded numbers all collapse to the same form; anything else is
/// passed through untouched.
pub fn normalize_month(m: &str) -> String {
    let s = normalize_text(m);
    if s.is_empty() {
        return String::new();
    }
    let sl = s.trim_matches(['.', ' ']).to_lowercase();
    let named = match sl.as_str() {
        "jan" | "january" => Some(1),
        "feb" | "february" => Some(2),
        "mar" | "march" => Some(3),
        "apr" | "april" => Some(4),
        "may" => Some(5),
        "jun" | "june" => Some(6),
        "jul" | "july" => Some(7),
        "aug" | "august" => Some(8),
        "sep" | "sept" | "september" => Some(9),
        "oct" | "october" => Some(10),
        "nov" | "november" => Some(11),
        "dec" | "december" => Some(12),
        _ => None,
    };
    if let Some(n) = named {
        return n.to_string();
    }
    if let Ok(n) = sl.parse::<u32>()
        && (1..=12).contains(&n)
    {
        return n.to_string();
    }
    s
}

/// "5" -> "May" for display; non-canonical values pass through.
pub fn month_display(m: &str) -> String {
    let m = normalize_month(m);
    match m.parse::<usize>() {
        Ok(n) if (1..=12).contains(&n) => MONTH_NAMES[n - 1].to_string(),
        _ => m,
    }
}

pub fn current_year() -> i64 {
    use chrono::Datelike;
    chrono::Utc::now().year() as i64
}

pub fn is_plausible_year(y: &str) -> bool {
    let y = normalize_text(y);
    match y.parse::<i64>() {
        Ok(n) => (1800..=current_year() + 1).contains(&n),
        Err(_) => false,
    }
}

/// Extract the first plausible 4-digit year from a noisy value like
/// "Aug 1987"; empty when none is found.
pub fn coerce_year(y: &str) -> String {
    let s = normalize_text(y);
    let bytes: Vec<char> = s.chars().collect();
    if bytes.len() < 4 {
        return String::new();
    }
    for w in bytes.windows(4) {
        if w.iter().all(|c| c.is_ascii_digit()) {
            let seg: String = w.iter().collect();
            if is_plausible_year(&seg) {
                return seg;
            }
        }
    }
    String::new()
}

/// Stable content hash over the (draft, best, suggestions) triple.
/// serde_json maps are BTree-backed, so serialisation is key-sorted and the
/// hash is order-independent with respect to field insertion.
pub fn fingerprint(
    draft: &serde_json::Value,
    best: &serde_json::Value,
    suggestions: &serde_json::Value,
) -> String {
    let payload = serde_json::json!({ "best": best, "draft": draft, "sugg": suggestions });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn token_similarity_ignores_word_order() {
        let a = "deep residual learning for image recognition";
        let b = "residual deep learning for recognition image";
        assert!(token_similarity(a, b) > 0.99);
    }

    #[test]
    fn token_similarity_empty_is_zero() {
        assert_eq!(token_similarity("", "anything"), 0.0);
    }

    #[test]
    fn authors_split_on_common_separators() {
        assert_eq!(
            authors_to_list("K. He, X. Zhang and J. Sun"),
            vec!["K. He", "X. Zhang", "J. Sun"]
        );
        assert_eq!(authors_to_list("A. One & B. Two"), vec!["A. One", "B. Two"]);
    }

    #[test]
    fn ieee_author_formatting() {
        assert_eq!(format_author_ieee("Kaiming He"), "K. He");
        assert_eq!(format_author_ieee("He, Kaiming"), "K. He");
        assert_eq!(format_author_ieee("Jean-Pierre Serre"), "J.-P. Serre");
        assert_eq!(format_author_ieee("Martin Luther King Jr."), "M. L. King, Jr.");
    }

    #[test]
    fn ieee_author_list_truncates_at_six() {
        let many: Vec<String> = (0..8).map(|i| format!("Alice Smith{i}")).collect();
        let out = format_authors_ieee_list(&many);
        assert!(out.ends_with("et al."));
        assert_eq!(out.matches(',').count(), 6);
    }

    #[test]
    fn sentence_case_preserves_ieee() {
        assert_eq!(
            sentence_case("Deep Learning In IEEE Transactions"),
            "Deep learning in IEEE transactions"
        );
    }

    #[test]
    fn month_canonical_forms_agree() {
        for m in ["Aug", "aug.", "august", "8", "08"] {
            assert_eq!(normalize_month(m), "8");
        }
        assert_eq!(month_display("8"), "Aug");
        assert_eq!(normalize_month("not a month"), "not a month");
    }

    proptest::proptest! {
        #[test]
        fn month_normalization_is_idempotent(m in "[A-Za-z0-9 .]{0,12}") {
            let once = normalize_month(&m);
            proptest::prop_assert_eq!(normalize_month(&once), once);
        }

        #[test]
        fn numeric_months_normalize(n in 1u32..=12) {
            proptest::prop_assert_eq!(normalize_month(&format!("{n:02}")), n.to_string());
        }
    }

    #[test]
    fn doi_normalization() {
        assert_eq!(normalize_doi("DOI:10.1109/CVPR.2016.90"), "10.1109/cvpr.2016.90");
        assert_eq!(
            format_doi_link("https://doi.org/10.1000/182"),
            "https://doi.org/10.1000/182"
        );
        assert_eq!(format_doi_link(""), "");
    }

    #[test]
    fn page_helpers() {
        assert_eq!(normalize_pages("5338\u{2013}5346"), ("5338-5346".into(), false));
        assert_eq!(normalize_pages("e1017"), ("e1017".into(), true));
        assert_eq!(page_range("5338-5346"), Some((5338, 5346)));
        assert_eq!(page_range("5346-5338"), None);
        assert_eq!(page_range("5338"), None);
    }

    #[test]
    fn year_coercion() {
        assert_eq!(coerce_year("Aug 1987"), "1987");
        assert_eq!(coerce_year("198"), "");
        assert_eq!(coerce_year("year 3000 maybe"), "");
        assert!(is_plausible_year("2015"));
        assert!(!is_plausible_year("1492"));
    }

    #[test]
    fn fingerprint_is_content_sensitive_and_stable() {
        let d1 = serde_json::json!({"title": "a", "year": "2015"});
        let d2 = serde_json::json!({"year": "2015", "title": "a"});
        let b = serde_json::json!({});
        let s = serde_json::json!({});
        assert_eq!(fingerprint(&d1, &b, &s), fingerprint(&d2, &b, &s));
        let d3 = serde_json::json!({"title": "a", "year": "2016"});
        assert_ne!(fingerprint(&d1, &b, &s), fingerprint(&d3, &b, &s));
    }
}
