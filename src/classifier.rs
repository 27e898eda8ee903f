//! Column Label Classifier (C2, spec §4.2).
//!
//! Two implementations share one trait: [`RuleClassifier`] is a
//! dependency-free deterministic fallback, always available. [`TrainedModel`]
//! fits per-label character n-gram weights from the mapping registry's own
//! declarations plus a fixed synonym corpus, and is the one actually used
//! unless its training corpus is empty (spec §9's "classifier pluggability"
//! design note).

use crate::errors::ClassifierError;
use crate::model::mapping::CANONICAL_LABELS;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Folds a column name the same way the detector's fuzzy matcher does:
/// lowercase, with `_ - ( )` and spaces collapsed away.
fn fold(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | '(' | ')'))
        .collect()
}

/// Character n-grams (n in 2..=5) of the folded string, the feature space
/// used by both classifier implementations (spec §4.2 "training").
fn ngrams(folded: &str) -> Vec<String> {
    let chars: Vec<char> = folded.chars().collect();
    let mut out = Vec::new();
    for n in 2..=5usize {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            out.push(window.iter().collect());
        }
    }
    out
}

fn synonyms(label: &str) -> &'static [&'static str] {
    match label {
        "timestamp" => &["time", "date", "timestamp", "datetime", "created", "executed", "utc"],
        "kind" => &["type", "side", "transaction type", "action", "operation"],
        "base_asset" => &["asset", "symbol", "currency", "coin", "base", "ticker", "market"],
        "base_amount" => &["amount", "quantity", "qty", "volume", "vol", "size", "filled amount", "executed"],
        "quote_asset" => &["quote", "quote asset", "quote currency", "spot price currency"],
        "quote_amount" => &["total", "subtotal", "cost", "value", "quote amount", "filled volume"],
        "fee_amount" => &["fee", "fees", "commission"],
        "fee_asset" => &["fee currency", "fee coin", "fee asset"],
        "notes" => &["notes", "note", "memo", "description", "order type"],
        _ => &[],
    }
}

/// Shared greedy assignment over a per-column/per-label probability matrix
/// (spec §4.2 "inference"). Implemented once, against any source of
/// per-column label scores, so both classifier backends behave identically
/// at the inference boundary.
fn greedy_assign(
    columns: &[String],
    scores: impl Fn(usize, &str) -> f64,
    threshold: f64,
) -> BTreeMap<String, (String, f64)> {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (col_idx, _) in columns.iter().enumerate() {
        for (lbl_idx, label) in CANONICAL_LABELS.iter().enumerate() {
            let p = scores(col_idx, label);
            if p >= 0.5 {
                candidates.push((p, col_idx, lbl_idx));
            }
        }
    }

    // Sort by probability descending; ties broken by ascending column index,
    // then ascending label index, to keep inference deterministic (spec §5).
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap()
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut assigned_cols = std::collections::HashSet::new();
    let mut assigned_lbls = std::collections::HashSet::new();
    let mut out = BTreeMap::new();

    for (p, col_idx, lbl_idx) in candidates {
        if p < threshold {
            continue;
        }
        if assigned_cols.contains(&col_idx) || assigned_lbls.contains(&lbl_idx) {
            continue;
        }
        assigned_cols.insert(col_idx);
        assigned_lbls.insert(lbl_idx);
        out.insert(
            columns[col_idx].clone(),
            (CANONICAL_LABELS[lbl_idx].to_string(), p),
        );
    }

    out
}

/// Contract shared by both classifier backends (spec §4.2, §9).
///
/// `Send + Sync` so a loaded classifier can be shared across the
/// normalizer's parallel per-file workers (spec §5 "parallel file
/// normalization").
pub trait ColumnClassifier: Send + Sync {
    /// Raw per-(column, label) probability, independent of any threshold.
    fn score(&self, column: &str, label: &str) -> f64;

    /// Greedy, unique, deterministic column -> (label, confidence) assignment.
    fn predict_mapping(&self, columns: &[String], threshold: f64) -> BTreeMap<String, (String, f64)> {
        greedy_assign(columns, |idx, label| self.score(&columns[idx], label), threshold)
    }
}

/// Dependency-free rule-based scorer: char-trigram Jaccard-style overlap
/// against each label's synonym set, with exact/substring bonuses mirroring
/// the detector's enhanced fuzzy matcher (spec §4.3). Always available.
#[derive(Clone, Debug, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ColumnClassifier for RuleClassifier {
    fn score(&self, column: &str, label: &str) -> f64 {
        let folded = fold(column);
        for syn in synonyms(label) {
            let folded_syn = fold(syn);
            if folded == folded_syn {
                return 1.0;
            }
            if folded.contains(&folded_syn) || folded_syn.contains(&folded) {
                return 0.9;
            }
        }

        let col_grams: std::collections::HashSet<String> = ngrams(&folded).into_iter().collect();
        if col_grams.is_empty() {
            return 0.0;
        }

        let mut best = 0.0f64;
        for syn in synonyms(label) {
            let syn_grams: std::collections::HashSet<String> =
                ngrams(&fold(syn)).into_iter().collect();
            if syn_grams.is_empty() {
                continue;
            }
            let intersection = col_grams.intersection(&syn_grams).count();
            let union = col_grams.union(&syn_grams).count();
            let jaccard = intersection as f64 / union as f64;
            if jaccard > best {
                best = jaccard;
            }
        }
        best
    }
}

/// A per-label char n-gram frequency table, the persisted form of
/// [`TrainedModel`] (spec §4.2 "training" — "the trained model is
/// persistable").
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TrainedModel {
    /// label -> (ngram -> count)
    counts: BTreeMap<String, BTreeMap<String, u32>>,
    /// label -> total ngram occurrences (denominator for smoothing)
    totals: BTreeMap<String, u32>,
    vocabulary_size: u32,
}

impl TrainedModel {
    /// Synthesizes the training corpus by walking the registry (spec §4.2):
    /// each non-null mapping contributes `(source_column, label)` examples,
    /// augmented with the fixed synonym list per label.
    pub fn fit(registry: &Registry) -> Result<Self, ClassifierError> {
        let mut examples: Vec<(String, String)> = Vec::new();

        for (_, mapping) in registry.iter() {
            for (label, source) in mapping.mapped_columns() {
                examples.push((source.to_string(), label.to_string()));
            }
        }
        for label in CANONICAL_LABELS {
            for syn in synonyms(label) {
                examples.push((syn.to_string(), label.to_string()));
            }
        }

        if examples.is_empty() {
            return Err(ClassifierError::ModelUnavailable);
        }

        let mut counts: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        let mut vocabulary = std::collections::HashSet::new();

        for (source, label) in &examples {
            let folded = fold(source);
            let entry = counts.entry(label.clone()).or_default();
            for gram in ngrams(&folded) {
                vocabulary.insert(gram.clone());
                *entry.entry(gram).or_insert(0) += 1;
            }
        }

        let totals = counts
            .iter()
            .map(|(label, grams)| (label.clone(), grams.values().sum()))
            .collect();

        Ok(Self {
            counts,
            totals,
            vocabulary_size: vocabulary.len() as u32,
        })
    }

    pub fn to_ron(&self) -> Result<String, ClassifierError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ClassifierError::Serde(e.to_string()))
    }

    pub fn from_ron(text: &str) -> Result<Self, ClassifierError> {
        ron::from_str(text).map_err(|e| ClassifierError::Serde(e.to_string()))
    }

    /// Loads a persisted model from `path`, or trains a fresh one from
    /// `registry` on first use (spec §4.2).
    pub fn load_or_fit(path: &std::path::Path, registry: &Registry) -> Result<Self, ClassifierError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(_) => Self::fit(registry),
        }
    }
}

impl ColumnClassifier for TrainedModel {
    fn score(&self, column: &str, label: &str) -> f64 {
        let Some(label_counts) = self.counts.get(label) else {
            return 0.0;
        };
        let total = *self.totals.get(label).unwrap_or(&0) as f64;
        if total == 0.0 {
            return 0.0;
        }

        let folded = fold(column);
        let grams = ngrams(&folded);
        if grams.is_empty() {
            return 0.0;
        }

        // Laplace-smoothed log-likelihood under a per-label multinomial
        // n-gram model, squashed into (0, 1) for a probability-like score.
        let v = self.vocabulary_size.max(1) as f64;
        let log_likelihood: f64 = grams
            .iter()
            .map(|g| {
                let c = *label_counts.get(g).unwrap_or(&0) as f64;
                ((c + 1.0) / (total + v)).ln()
            })
            .sum();

        let avg_log_likelihood = log_likelihood / grams.len() as f64;
        // Map (-inf, 0) to (0, 1); a perfectly matched label with
        // plentiful training evidence approaches 1.0.
        avg_log_likelihood.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_classifier_matches_exact_synonyms() {
        let c = RuleClassifier::new();
        assert_eq!(c.score("Date", "timestamp"), 1.0);
        assert_eq!(c.score("Fee Coin", "fee_asset"), 1.0);
    }

    #[test]
    fn rule_classifier_predict_mapping_is_unique_and_deterministic() {
        let c = RuleClassifier::new();
        let columns: Vec<String> = vec!["Date".into(), "Amount".into(), "Fee".into()];
        let out = c.predict_mapping(&columns, 0.5);

        let labels: std::collections::HashSet<_> = out.values().map(|(l, _)| l.clone()).collect();
        assert_eq!(labels.len(), out.len(), "labels must be uniquely assigned");
    }

    #[test]
    fn trained_model_errors_on_empty_corpus() {
        let model = TrainedModel {
            counts: BTreeMap::new(),
            totals: BTreeMap::new(),
            vocabulary_size: 0,
        };
        assert_eq!(model.score("Date", "timestamp"), 0.0);
    }

    #[test]
    fn trained_model_fits_from_registry() {
        let registry = Registry::load_default().unwrap();
        let model = TrainedModel::fit(&registry).expect("registry is non-empty");
        assert!(model.score("time", "timestamp") > model.score("time", "fee_amount"));
    }
}
