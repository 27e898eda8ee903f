//! Exchange Detector (C3, spec §4.3).

use crate::errors::DetectError;
use crate::model::ExchangeMapping;
use crate::registry::Registry;
use crate::tabular::{self, Table};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const CONFIDENCE_THRESHOLD: f64 = 0.9;
const TIE_WINDOW: f64 = 0.05;
const DETECTION_SAMPLE_ROWS: usize = 9; // plus the header row, ten total.

/// Result of scoring every candidate exchange against one file (spec §4.3).
#[derive(Clone, Debug)]
pub struct Detection {
    pub exchange_id: String,
    pub confidence: f64,
    pub needs_confirmation: bool,
    pub ties: Vec<(String, f64)>,
    pub scores: BTreeMap<String, f64>,
}

fn fold(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | '(' | ')'))
        .collect()
}

fn tokens(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

const KEYWORD_CATEGORIES: &[(&str, &[&str])] = &[
    ("timestamp", &["time", "date", "timestamp", "datetime", "created", "executed", "utc"]),
    ("kind", &["type", "side", "action", "operation", "transaction"]),
    ("asset", &["asset", "symbol", "currency", "coin", "ticker", "pair", "market"]),
    ("amount", &["amount", "quantity", "qty", "volume", "vol", "size", "filled"]),
    ("price", &["price", "rate", "spot"]),
    ("fee", &["fee", "fees", "commission"]),
    ("total", &["total", "subtotal", "cost", "value"]),
    ("id", &["id", "txid", "reference", "order"]),
    ("notes", &["notes", "note", "memo", "description"]),
];

const CRITICAL_CATEGORIES: &[&str] = &["timestamp", "kind", "fee"];

/// Substrings that, shared between two column strings, identify the same
/// exchange family (spec §4.3: "xbt and xeth both mark Kraken").
const EXCHANGE_FAMILIES: &[&[&str]] = &[&["xbt", "xeth", "xetc", "xxbt", "xxdg", "zusd", "zeur"]];

fn shares_family_substring(a: &str, b: &str) -> bool {
    EXCHANGE_FAMILIES
        .iter()
        .any(|family| family.iter().any(|s| a.contains(s)) && family.iter().any(|s| b.contains(s)))
}

/// Enhanced fuzzy match between two column-ish strings (spec §4.3).
pub fn enhanced_fuzzy_match(a: &str, b: &str) -> bool {
    let fa = fold(a);
    let fb = fold(b);
    if fa.is_empty() || fb.is_empty() {
        return false;
    }
    if fa.contains(&fb) || fb.contains(&fa) {
        return true;
    }

    for (category, words) in KEYWORD_CATEGORIES {
        let a_has = words.iter().any(|w| fa.contains(&fold(w)));
        let b_has = words.iter().any(|w| fb.contains(&fold(w)));
        if !(a_has && b_has) {
            continue;
        }
        if CRITICAL_CATEGORIES.contains(category) {
            if !tokens(a).is_disjoint(&tokens(b)) {
                return true;
            }
        } else {
            return true;
        }
    }

    shares_family_substring(&fa, &fb)
}

fn header_matches(source: &str, headers: &[String]) -> Option<f64> {
    let folded_source = fold(source);
    if headers.iter().any(|h| fold(h) == folded_source) {
        return Some(1.0);
    }
    if headers.iter().any(|h| enhanced_fuzzy_match(source, h)) {
        return Some(0.9);
    }
    None
}

fn column_count_score(mapping: &ExchangeMapping, header_count: usize) -> f64 {
    match mapping.column_count_range {
        Some((min, max)) if (min..=max).contains(&header_count) => 0.1,
        _ => 0.0,
    }
}

const COMMON_QUOTE_SUFFIXES: &[&str] = &["USD", "USDT", "USDC", "EUR", "GBP", "BTC", "ETH"];
const KIND_WORDS: &[&str] = &["buy", "sell", "deposit", "withdraw", "trade"];

fn data_pattern_score(rows: &[Vec<String>]) -> f64 {
    let mut has_timestamp = false;
    let mut has_pair_prefix = false;
    let mut has_pair_hint = false;
    let mut kind_words_seen: HashSet<&str> = HashSet::new();

    for row in rows {
        for value in row {
            let v = value.trim();
            if v.is_empty() {
                continue;
            }
            if (v.contains('T') && v.contains('Z'))
                || v.contains('+')
                || (v.len() >= 10 && v.chars().all(|c| c.is_ascii_digit()))
            {
                has_timestamp = true;
            }

            let upper = v.to_uppercase();
            if (upper.starts_with('X') || upper.starts_with('Z')) && upper.len() >= 6 {
                has_pair_prefix = true;
            }
            if ['/', '-', '_'].iter().any(|sep| v.contains(*sep))
                || COMMON_QUOTE_SUFFIXES.iter().any(|q| upper.ends_with(q))
            {
                has_pair_hint = true;
            }

            let lower = v.to_lowercase();
            if let Some(word) = KIND_WORDS.iter().find(|w| lower == **w) {
                kind_words_seen.insert(word);
            }
        }
    }

    let mut score = 0.0;
    if has_timestamp {
        score += 0.1;
    }
    if has_pair_prefix {
        score += 0.2;
    } else if has_pair_hint {
        score += 0.1;
    }
    if kind_words_seen.len() >= 2 {
        score += 0.2;
    }
    score
}

fn score_mapping(mapping: &ExchangeMapping, headers: &[String], rows: &[Vec<String>]) -> f64 {
    let mut matched_weight = 0.0;
    let mut total_weight = 0.0;
    let mut matched_unique = 0usize;

    for (_, source) in mapping.mapped_columns() {
        let weight = if mapping.unique_columns.iter().any(|u| u == source) { 2.0 } else { 1.0 };
        total_weight += weight;
        if let Some(factor) = header_matches(source, headers) {
            matched_weight += weight * factor;
        }
    }
    let column_score = if total_weight > 0.0 { matched_weight / total_weight } else { 0.0 };

    for unique in &mapping.unique_columns {
        if header_matches(unique, headers).is_some() {
            matched_unique += 1;
        }
    }
    let unique_bonus = if mapping.unique_columns.is_empty() {
        0.0
    } else {
        (matched_unique as f64 / mapping.unique_columns.len() as f64).clamp(0.0, 1.0)
    };

    let concatenated: String = headers.iter().map(|h| fold(h)).collect::<Vec<_>>().join(" ");
    let mut signature_score = if mapping.signature_patterns.is_empty() {
        0.0
    } else {
        let mut sum = 0.0;
        for pattern in &mapping.signature_patterns {
            let folded_pattern = fold(pattern);
            let level = if headers.iter().any(|h| fold(h) == folded_pattern) {
                1.0
            } else if headers.iter().any(|h| fold(h).contains(&folded_pattern)) {
                0.9
            } else if concatenated.contains(&folded_pattern) {
                0.7
            } else if tokens(pattern).iter().any(|t| concatenated.contains(t.as_str())) {
                0.4
            } else {
                0.0
            };
            sum += level;
        }
        sum / mapping.signature_patterns.len() as f64
    };
    if signature_score >= 0.8 {
        signature_score = (signature_score * 1.2).min(1.0);
    }

    let pattern_score = column_count_score(mapping, headers.len()) + data_pattern_score(rows);

    let mut score = 0.35 * column_score + 0.35 * signature_score + 0.20 * unique_bonus + 0.10 * pattern_score;

    if !mapping.unique_columns.is_empty() {
        let ratio = matched_unique as f64 / mapping.unique_columns.len() as f64;
        if ratio < 0.5 {
            score *= 0.7;
        } else if ratio >= 0.9 {
            score = (score * 1.3).min(1.0);
        } else if ratio >= 0.7 {
            score *= 1.15;
        }
    }

    if !mapping.required_columns.is_empty() {
        let matched_required = mapping
            .required_columns
            .iter()
            .filter(|c| header_matches(c, headers).is_some())
            .count();
        let rr = matched_required as f64 / mapping.required_columns.len() as f64;
        if rr >= 0.9 {
            score *= 1.2;
        } else if rr >= 0.7 {
            score *= 1.1;
        } else if rr < 0.5 {
            score *= 0.8;
        }
    }

    score
}

fn score_table(registry: &Registry, table: &Table) -> Result<BTreeMap<String, f64>, DetectError> {
    if table.headers.len() < 3 || table.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(DetectError::InvalidFormat(
            "file has fewer than 3 columns or no non-empty headers".into(),
        ));
    }

    let mut scores = BTreeMap::new();
    for (id, mapping) in registry.iter() {
        scores.insert(id.to_string(), score_mapping(mapping, &table.headers, &table.rows));
    }
    Ok(scores)
}

fn pick_best(scores: &BTreeMap<String, f64>) -> Detection {
    let (best_id, best_score) = scores
        .iter()
        .map(|(id, score)| (id.clone(), *score))
        .fold(None, |acc: Option<(String, f64)>, (id, score)| match acc {
            Some((acc_id, acc_score)) if acc_score >= score => Some((acc_id, acc_score)),
            _ => Some((id, score)),
        })
        .unwrap_or(("unknown".to_string(), 0.0));

    let ties: Vec<(String, f64)> = scores
        .iter()
        .filter(|(id, score)| **id != best_id && **score > 0.5 && (**score - best_score).abs() < TIE_WINDOW)
        .map(|(id, score)| (id.clone(), *score))
        .collect();

    let needs_confirmation = best_score < CONFIDENCE_THRESHOLD || !ties.is_empty();

    Detection {
        exchange_id: best_id,
        confidence: best_score,
        needs_confirmation,
        ties,
        scores: scores.clone(),
    }
}

/// Detects the best-matching exchange for `path` (spec §4.3).
pub fn detect_exchange(path: &Path, registry: &Registry, sheet: Option<&str>) -> Result<Detection, DetectError> {
    let table = tabular::read_table(path, sheet, Some(DETECTION_SAMPLE_ROWS))?;
    let scores = score_table(registry, &table)?;
    Ok(pick_best(&scores))
}

/// Top-5 scored candidates for interactive confirmation flows, supplementing
/// the winner-only contract above (spec §4.3 "batch scanning", §10.5).
pub fn suggestions(path: &Path, registry: &Registry, sheet: Option<&str>) -> Result<Vec<(String, f64)>, DetectError> {
    let table = tabular::read_table(path, sheet, Some(DETECTION_SAMPLE_ROWS))?;
    let scores = score_table(registry, &table)?;
    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    ranked.truncate(5);
    Ok(ranked)
}

/// Detection result for one file within a directory scan.
pub struct FileDetection {
    pub path: std::path::PathBuf,
    pub detection: Result<Detection, DetectError>,
}

/// Scans `dir` non-recursively for `.csv`/`.xlsx` files and detects each
/// (spec §4.3 "batch scanning", grounded on `auto_detect.py::scan_input_folder`).
pub fn scan_input_folder(dir: &Path, registry: &Registry) -> std::io::Result<Vec<FileDetection>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_tabular = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_lowercase().as_str(), "csv" | "xlsx"))
            .unwrap_or(false);
        if !is_tabular {
            continue;
        }
        let detection = detect_exchange(&path, registry, None);
        out.push(FileDetection { path, detection });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(unique: &[&str], required: &[&str], fields: &[(&str, &str)]) -> ExchangeMapping {
        let mut m = ExchangeMapping::default();
        for (label, source) in fields {
            m.fields.insert(label.to_string(), Some(source.to_string()));
        }
        m.unique_columns = unique.iter().map(|s| s.to_string()).collect();
        m.required_columns = required.iter().map(|s| s.to_string()).collect();
        m
    }

    #[test]
    fn exact_header_match_scores_higher_than_no_match() {
        let m = mapping(
            &["Date(UTC)"],
            &["Date(UTC)", "Amount"],
            &[("timestamp", "Date(UTC)"), ("base_amount", "Amount")],
        );
        let headers = vec!["Date(UTC)".to_string(), "Amount".to_string(), "Fee".to_string()];
        let score = score_mapping(&m, &headers, &[]);
        assert!(score > 0.0);

        let unrelated_headers = vec!["foo".to_string(), "bar".to_string(), "baz".to_string()];
        let unrelated_score = score_mapping(&m, &unrelated_headers, &[]);
        assert!(score > unrelated_score);
    }

    #[test]
    fn fuzzy_match_shares_kraken_family_substring() {
        assert!(enhanced_fuzzy_match("XXBT", "XETH"));
    }

    #[test]
    fn rejects_files_with_too_few_columns() {
        let registry = Registry::load_default().unwrap();
        let table = Table {
            headers: vec!["a".into(), "b".into()],
            rows: vec![],
        };
        assert!(matches!(score_table(&registry, &table), Err(DetectError::InvalidFormat(_))));
    }

    /// Scenario 6 (spec §8.4): a file whose columns match two exchanges
    /// within the 0.05 tie window must come back `needs_confirmation` with
    /// both candidates listed.
    #[test]
    fn identical_candidate_mappings_produce_a_detection_tie() {
        let headers = vec!["Date(UTC)".to_string(), "Side".to_string(), "Amount".to_string()];
        let m = mapping(&["Date(UTC)"], &["Date(UTC)", "Side", "Amount"], &[("timestamp", "Date(UTC)"), ("base_amount", "Amount")]);

        let mut scores = BTreeMap::new();
        scores.insert("binance".to_string(), score_mapping(&m, &headers, &[]));
        scores.insert("kucoin".to_string(), score_mapping(&m, &headers, &[]));

        let detection = pick_best(&scores);
        assert!(detection.needs_confirmation);
        assert_eq!(detection.ties.len(), 1);
    }
}
