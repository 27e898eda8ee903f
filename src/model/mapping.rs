use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The nine canonical field labels a source column can be mapped to
/// (spec §3.1, §4.2).
pub const CANONICAL_LABELS: &[&str] = &[
    "timestamp",
    "kind",
    "base_asset",
    "base_amount",
    "quote_asset",
    "quote_amount",
    "fee_amount",
    "fee_asset",
    "notes",
];

/// A declarative per-exchange field-mapping and identification signature
/// (spec §3.2, §6.3).
///
/// Stored on disk as a RON document keyed by lowercase exchange id; see
/// `registry::Registry::load`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExchangeMapping {
    /// Canonical label -> source column name, or `None` when unmapped.
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,

    /// Columns whose presence strongly implies this exchange (weight 2x).
    #[serde(default)]
    pub unique_columns: Vec<String>,

    /// Free-form substrings whose presence in column text boosts the score.
    #[serde(default)]
    pub signature_patterns: Vec<String>,

    /// Columns whose absence penalizes the score.
    #[serde(default)]
    pub required_columns: Vec<String>,

    /// Inclusive `(min, max)` column-count window for the detector's
    /// data-pattern heuristics (spec §3.2, §9 open question #3).
    #[serde(default)]
    pub column_count_range: Option<(usize, usize)>,
}

impl ExchangeMapping {
    /// Source-column strings for labels that have a declared, non-null
    /// mapping, i.e. `E` in spec §4.3.
    pub fn mapped_columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|(label, source)| source.as_deref().map(|s| (label.as_str(), s)))
    }

    pub fn source_for(&self, label: &str) -> Option<&str> {
        self.fields.get(label).and_then(|v| v.as_deref())
    }
}
