//! Normalizer (C4, spec §4.4).
//!
//! Turns one raw tabular export into canonical [`TransactionRecord`]s:
//! resolve the column mapping (declarative registry entry, augmented by
//! the classifier for unmapped columns), rename, parse field contents,
//! infer a missing trading pair, and sort the result deterministically.

use crate::classifier::ColumnClassifier;
use crate::errors::NormalizeError;
use crate::model::record::TxId;
use crate::model::{Kind, TransactionRecord};
use crate::oracle::PriceOracle;
use crate::registry::Registry;
use crate::tabular::{self, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Suffix-match order for [`parse_pair`] when no separator is present
/// (spec §4.4 "parse_pair").
const SUFFIX_ORDER: &[&str] = &["USDT", "USDC", "USD", "EUR", "GBP", "BTC", "ETH"];

/// Exchanges whose `base_asset` column is always a combined trading pair
/// and must be re-split (spec §4.4 "Exchange-specific pair parsing").
const ALWAYS_RESPLIT: &[&str] = &["kraken", "bitfinex", "bitstamp", "bittrex", "htx"];

const PAIR_COLUMN_HINTS: &[&str] = &["pair", "market", "symbol", "instrument", "product", "book", "ticker", "currency_pair"];

const NULL_TOKENS: &[&str] = &["na", "n/a", "none", "null", "-"];

#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    pub fetch_missing_prices: bool,
    pub remove_duplicates: bool,
    pub sheet: Option<String>,
    pub classifier_threshold: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            fetch_missing_prices: false,
            remove_duplicates: true,
            sheet: None,
            classifier_threshold: 0.8,
        }
    }
}

/// Splits a combined trading-pair string, e.g. `"XBTUSD"` or `"ETH/USD"`,
/// into `(base, quote)` (spec §4.4 "parse_pair").
pub fn parse_pair(s: &str) -> (String, Option<String>) {
    let trimmed = s.trim();
    let stripped = match trimmed.chars().next() {
        Some('X') | Some('Z') => &trimmed[1..],
        _ => trimmed,
    };

    for sep in ['/', '-', '_'] {
        if let Some((base, quote)) = stripped.split_once(sep) {
            return (base.to_string(), Some(quote.to_string()));
        }
    }

    for suffix in SUFFIX_ORDER {
        if stripped.len() > suffix.len() && stripped.ends_with(suffix) {
            let base = &stripped[..stripped.len() - suffix.len()];
            return (base.to_string(), Some(suffix.to_string()));
        }
    }

    (stripped.to_string(), None)
}

/// Parses one amount/currency field per spec §4.4 "Number parsing".
/// Returns `(value, well_formed)`; malformed input yields `(0, false)`.
pub fn parse_number(raw: &str) -> (Decimal, bool) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (Decimal::ZERO, true);
    }

    let mut s: String = trimmed.chars().filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | '₿' | ' ')).collect();

    let negative = s.starts_with('(') && s.ends_with(')');
    if negative {
        s = s[1..s.len() - 1].to_string();
    }

    let comma_count = s.matches(',').count();
    let has_dot = s.contains('.');
    if comma_count == 1 && !has_dot {
        s = s.replace(',', ".");
    } else {
        s = s.replace(',', "");
    }

    match Decimal::from_str(&s) {
        Ok(value) => (if negative { -value } else { value }, true),
        Err(_) => (Decimal::ZERO, false),
    }
}

/// Parses a timestamp permissively, per spec §4.4 "Timestamp parsing":
/// null tokens map to `None`; otherwise try RFC 3339, then a fixed set of
/// common layouts, then a day-first fallback.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || NULL_TOKENS.contains(&trimmed.to_lowercase().as_str()) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    const MONTH_FIRST_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S", "%m/%d/%Y %H:%M:%S", "%m/%d/%Y %H:%M", "%Y-%m-%d"];
    for layout in MONTH_FIRST_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, layout) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        }
    }

    const DAY_FIRST_LAYOUTS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%d/%m/%Y", "%d-%m-%Y"];
    for layout in DAY_FIRST_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, layout) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        }
    }

    None
}

fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

/// Builds `{header -> canonical_label}` from the declarative mapping,
/// first occurrence per source column wins (spec §4.4 step 3).
fn declarative_rename(mapping: Option<&crate::model::ExchangeMapping>, headers: &[String]) -> BTreeMap<String, String> {
    let mut rename = BTreeMap::new();
    let Some(mapping) = mapping else { return rename };

    for (label, source) in mapping.mapped_columns() {
        if let Some(header) = headers.iter().find(|h| h.as_str() == source) {
            rename.entry(header.clone()).or_insert_with(|| label.to_string());
        }
    }
    rename
}

/// Augments `rename` with classifier predictions over the still-unmapped
/// columns, declarative mapping taking precedence (spec §4.4 step 4, §9
/// open question #1).
fn augment_with_classifier(rename: &mut BTreeMap<String, String>, headers: &[String], classifier: &dyn ColumnClassifier, threshold: f64) {
    let occupied_labels: HashSet<&str> = rename.values().map(String::as_str).collect();
    let unmapped: Vec<String> = headers.iter().filter(|h| !rename.contains_key(*h)).cloned().collect();
    if unmapped.is_empty() {
        return;
    }

    for (column, (label, _confidence)) in classifier.predict_mapping(&unmapped, threshold) {
        if !occupied_labels.contains(label.as_str()) {
            rename.insert(column, label);
        }
    }
}

fn column_index(headers: &[String], rename: &BTreeMap<String, String>, label: &str) -> Option<usize> {
    rename
        .iter()
        .find(|(_, l)| l.as_str() == label)
        .and_then(|(header, _)| headers.iter().position(|h| h == header))
}

fn cell<'a>(row: &'a [String], index: Option<usize>) -> Option<&'a str> {
    index.and_then(|i| row.get(i)).map(String::as_str)
}

/// Infers `base_asset`/`quote_asset` from a combined trading-pair column
/// when the direct mapping is missing (spec §4.4 "Trading-pair inference").
fn infer_pair_column(headers: &[String], table_rows: &[Vec<String>]) -> Option<usize> {
    let candidates: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            let folded = fold(h);
            PAIR_COLUMN_HINTS.iter().any(|hint| folded.contains(hint))
        })
        .map(|(i, _)| i)
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for idx in candidates {
        let samples: Vec<&str> = table_rows.iter().filter_map(|r| r.get(idx)).map(String::as_str).filter(|s| !s.trim().is_empty()).take(80).collect();
        if samples.is_empty() {
            continue;
        }
        let successes = samples.iter().filter(|s| parse_pair(s).1.is_some()).count();
        let ratio = successes as f64 / samples.len() as f64;
        if ratio >= 0.5 && best.map(|(_, best_ratio)| ratio > best_ratio).unwrap_or(true) {
            best = Some((idx, ratio));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Normalizes one tabular file into canonical records (spec §4.4).
pub fn normalize(
    path: &Path,
    exchange_id: &str,
    registry: &Registry,
    classifier: &dyn ColumnClassifier,
    oracle: Option<&dyn PriceOracle>,
    tax_currency: &str,
    options: &NormalizeOptions,
) -> Result<(Vec<TransactionRecord>, crate::errors::ErrorCollector), NormalizeError> {
    let mapping = registry.get(exchange_id)?;

    let table = read_input(path, options.sheet.as_deref())?;
    if table.rows.is_empty() {
        return Err(NormalizeError::EmptyData);
    }

    let mut rename = declarative_rename(mapping, &table.headers);
    augment_with_classifier(&mut rename, &table.headers, classifier, options.classifier_threshold);

    let timestamp_idx = column_index(&table.headers, &rename, "timestamp");
    let kind_idx = column_index(&table.headers, &rename, "kind");
    let base_asset_idx = column_index(&table.headers, &rename, "base_asset");
    let base_amount_idx = column_index(&table.headers, &rename, "base_amount");
    let quote_asset_idx = column_index(&table.headers, &rename, "quote_asset");
    let quote_amount_idx = column_index(&table.headers, &rename, "quote_amount");
    let fee_amount_idx = column_index(&table.headers, &rename, "fee_amount");
    let fee_asset_idx = column_index(&table.headers, &rename, "fee_asset");
    let notes_idx = column_index(&table.headers, &rename, "notes");

    let pair_idx = if base_asset_idx.is_none() || quote_asset_idx.is_none() {
        infer_pair_column(&table.headers, &table.rows)
    } else {
        None
    };

    let mut missing = Vec::new();
    if timestamp_idx.is_none() {
        missing.push("timestamp".to_string());
    }
    if kind_idx.is_none() {
        missing.push("kind".to_string());
    }
    if base_asset_idx.is_none() && pair_idx.is_none() {
        missing.push("base_asset".to_string());
    }
    if base_amount_idx.is_none() {
        missing.push("base_amount".to_string());
    }
    if !missing.is_empty() {
        return Err(NormalizeError::MappingInsufficient(missing));
    }

    let source_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("input").to_string();
    let always_resplit = ALWAYS_RESPLIT.contains(&exchange_id);

    let mut errors = crate::errors::ErrorCollector::new("normalize");
    let mut records = Vec::new();

    for (row_index, row) in table.rows.iter().enumerate() {
        let Some(timestamp_raw) = cell(row, timestamp_idx) else { continue };
        let Some(timestamp) = parse_timestamp(timestamp_raw) else {
            errors.warn(format!("row {row_index}: unparseable timestamp '{timestamp_raw}'"));
            continue;
        };

        let kind_raw = cell(row, kind_idx).unwrap_or("");
        let kind = match Kind::parse(kind_raw) {
            Some(k) => k,
            None => {
                errors.warn(format!("row {row_index}: empty transaction kind"));
                continue;
            }
        };
        if kind == Kind::Transfer && !kind_raw.trim().eq_ignore_ascii_case("transfer") {
            errors.warn(format!("row {row_index}: unrecognized transaction kind '{kind_raw}', treated as transfer"));
        }

        let (mut base_asset, mut quote_asset) = match (cell(row, base_asset_idx), cell(row, quote_asset_idx)) {
            (Some(b), q) => (b.to_string(), q.map(str::to_string).unwrap_or_default()),
            (None, _) => {
                let (b, q) = pair_idx.and_then(|idx| cell(row, Some(idx))).map(parse_pair).unwrap_or_default();
                (b, q.unwrap_or_default())
            }
        };

        if always_resplit {
            let (b, q) = parse_pair(&base_asset);
            base_asset = b;
            if let Some(q) = q {
                quote_asset = q;
            }
        }

        base_asset = normalize_ticker(&base_asset);
        quote_asset = normalize_ticker(&quote_asset);

        let (base_amount, base_ok) = parse_number(cell(row, base_amount_idx).unwrap_or("0"));
        let (mut quote_amount, quote_ok) = cell(row, quote_amount_idx).map(parse_number).unwrap_or((Decimal::ZERO, true));
        let (fee_amount, fee_ok) = cell(row, fee_amount_idx).map(parse_number).unwrap_or((Decimal::ZERO, true));
        if !base_ok || !quote_ok || !fee_ok {
            errors.warn(format!("row {row_index}: non-numeric value coerced to 0"));
        }

        let mut fee_asset = cell(row, fee_asset_idx).map(normalize_ticker).unwrap_or_default();
        if fee_asset.is_empty() && !quote_asset.is_empty() {
            fee_asset = quote_asset.clone();
        }

        if options.fetch_missing_prices && quote_amount <= Decimal::ZERO {
            if let Some(oracle) = oracle {
                if let Some(price) = oracle.price(&base_asset, timestamp, tax_currency) {
                    quote_amount = price * base_amount;
                }
            }
        }

        let notes = cell(row, notes_idx).unwrap_or("").to_string();

        records.push(TransactionRecord {
            timestamp,
            kind,
            base_asset,
            base_amount,
            quote_asset,
            quote_amount,
            fee_amount,
            fee_asset,
            notes,
            source_tx: TxId::synthesize(&source_name, row_index),
            input_index: row_index,
        });
    }

    if options.remove_duplicates {
        let mut seen = HashSet::new();
        records.retain(|r| seen.insert((r.timestamp, r.kind, r.base_amount, r.quote_asset.clone())));
    }

    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then(a.input_index.cmp(&b.input_index)));

    Ok((records, errors))
}

fn read_input(path: &Path, sheet: Option<&str>) -> Result<Table, NormalizeError> {
    if !path.exists() {
        return Err(NormalizeError::FileNotFound(path.display().to_string()));
    }
    tabular::read_table(path, sheet, None).map_err(|e| NormalizeError::InvalidFormat(e.to_string()))
}

/// Writes `records` as the canonical normalized CSV (spec §6.1).
pub fn write_canonical_csv(path: &Path, records: &[TransactionRecord]) -> Result<(), NormalizeError> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    writer.write_record(["timestamp", "type", "base_asset", "base_amount", "quote_asset", "quote_amount", "fee_amount", "fee_asset", "notes"])?;

    for r in records {
        writer.write_record(&[
            r.timestamp.to_rfc3339(),
            r.kind.as_str().to_string(),
            r.base_asset.clone(),
            r.base_amount.to_string(),
            r.quote_asset.clone(),
            r.quote_amount.to_string(),
            r.fee_amount.to_string(),
            r.fee_asset.clone(),
            r.notes.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
