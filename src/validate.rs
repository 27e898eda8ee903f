//! Validator (C5, spec §4.5).

use crate::errors::ValidateError;
use crate::model::{Kind, TransactionRecord};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 8); // 1e-8

#[derive(Clone, Debug)]
pub struct NegativeBalance {
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
    pub kind: Kind,
    pub amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct OrphanSell {
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub kind: Kind,
}

/// Invariant-violation report over a canonical record stream (spec §4.5).
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub total_transactions: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duplicates_found: usize,
    pub negative_amounts: usize,
    pub negative_balances: Vec<NegativeBalance>,
    pub invalid_dates: usize,
    pub missing_data: BTreeMap<String, usize>,
    pub type_warnings: usize,
    pub orphan_sells: Vec<OrphanSell>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `Err` only when `strict` and any fatal issue was found (spec §4.5, §7).
    pub fn enforce(&self, strict: bool) -> Result<(), ValidateError> {
        let fatal_count = self.errors.len()
            + if strict {
                self.duplicates_found
                    + self.negative_balances.len()
                    + self.invalid_dates
                    + self.orphan_sells.len()
            } else {
                0
            };
        if !self.errors.is_empty() || (strict && fatal_count > 0) {
            Err(ValidateError::Fatal(fatal_count.max(self.errors.len())))
        } else {
            Ok(())
        }
    }
}

fn min_reasonable_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2009, 1, 1, 0, 0, 0).unwrap()
}

/// Computes a [`ValidationReport`] over `records` (spec §4.5).
///
/// `type_warnings` is carried forward from the normalizer's number-parsing
/// pass rather than recomputed here, since by this stage amounts are already
/// typed `Decimal` values (a deliberate generalization from the original
/// dataframe-based validator, which re-parsed raw strings; see DESIGN.md).
pub fn validate(records: &[TransactionRecord], type_warnings: usize, as_of: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport {
        total_transactions: records.len(),
        type_warnings,
        ..Default::default()
    };

    if records.is_empty() {
        return report;
    }

    check_missing_data(records, &mut report);
    if !report.missing_data.is_empty() {
        for (field, count) in &report.missing_data {
            report
                .errors
                .push(format!("missing required field '{field}' in {count} transaction(s)"));
        }
        return report;
    }

    report.duplicates_found = check_duplicates(records);
    report.negative_amounts = check_negative_amounts(records);
    report.negative_balances = check_balances(records);
    report.invalid_dates = check_date_validity(records, as_of);
    report.orphan_sells = check_transaction_sequence(records);

    if report.duplicates_found > 0 {
        report
            .warnings
            .push(format!("found {} potential duplicate transactions", report.duplicates_found));
    }
    if report.negative_amounts > 0 {
        report.warnings.push(format!(
            "found {} buy/deposit/stake/airdrop transactions with negative amounts",
            report.negative_amounts
        ));
    }
    if !report.negative_balances.is_empty() {
        report
            .warnings
            .push(format!("found {} negative-balance point(s)", report.negative_balances.len()));
    }
    if report.invalid_dates > 0 {
        report.warnings.push(format!("found {} invalid or unreasonable date(s)", report.invalid_dates));
    }

    report
}

fn check_missing_data(records: &[TransactionRecord], report: &mut ValidationReport) {
    let mut missing_base_asset = 0usize;
    for r in records {
        if r.base_asset.trim().is_empty() {
            missing_base_asset += 1;
        }
    }
    if missing_base_asset > 0 {
        report.missing_data.insert("base_asset".to_string(), missing_base_asset);
    }
    // timestamp/kind/base_amount are non-optional on TransactionRecord by construction.
}

fn check_duplicates(records: &[TransactionRecord]) -> usize {
    let mut seen: HashSet<(DateTime<Utc>, &'static str, String, Decimal)> = HashSet::new();
    let mut duplicates = 0usize;
    for r in records {
        let key = (r.timestamp, r.kind.as_str(), r.base_asset.clone(), r.base_amount);
        if !seen.insert(key) {
            duplicates += 1;
        }
    }
    duplicates
}

fn check_negative_amounts(records: &[TransactionRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.kind.is_acquisition() && r.base_amount < Decimal::ZERO)
        .count()
}

fn check_balances(records: &[TransactionRecord]) -> Vec<NegativeBalance> {
    let mut by_asset: BTreeMap<&str, Vec<&TransactionRecord>> = BTreeMap::new();
    for r in records {
        by_asset.entry(r.base_asset.as_str()).or_default().push(r);
    }

    let mut negatives = Vec::new();
    for (asset, mut rows) in by_asset {
        rows.sort_by_key(|r| (r.timestamp, r.input_index));
        let mut balance = Decimal::ZERO;
        for r in rows {
            match r.kind {
                Kind::Buy | Kind::Deposit | Kind::Stake | Kind::Airdrop => balance += r.base_amount,
                Kind::Sell | Kind::Withdraw | Kind::Fee | Kind::Transfer => balance -= r.base_amount,
            }
            if balance < -BALANCE_TOLERANCE {
                negatives.push(NegativeBalance {
                    asset: asset.to_string(),
                    timestamp: r.timestamp,
                    balance,
                    kind: r.kind,
                    amount: r.base_amount,
                });
            }
        }
    }
    negatives
}

fn check_date_validity(records: &[TransactionRecord], as_of: DateTime<Utc>) -> usize {
    let min_date = min_reasonable_date();
    let max_date = as_of + chrono::Duration::days(1);
    records
        .iter()
        .filter(|r| r.timestamp < min_date || r.timestamp > max_date)
        .count()
}

fn check_transaction_sequence(records: &[TransactionRecord]) -> Vec<OrphanSell> {
    let mut by_asset: BTreeMap<&str, Vec<&TransactionRecord>> = BTreeMap::new();
    for r in records {
        by_asset.entry(r.base_asset.as_str()).or_default().push(r);
    }

    let mut orphans = Vec::new();
    for (asset, mut rows) in by_asset {
        rows.sort_by_key(|r| (r.timestamp, r.input_index));
        let mut has_acquisition = false;
        for r in rows {
            match r.kind {
                Kind::Buy | Kind::Deposit | Kind::Stake | Kind::Airdrop => has_acquisition = true,
                Kind::Sell | Kind::Withdraw if !has_acquisition => {
                    orphans.push(OrphanSell {
                        asset: asset.to_string(),
                        timestamp: r.timestamp,
                        kind: r.kind,
                    });
                }
                _ => {}
            }
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::TxId;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record(kind: Kind, asset: &str, amount: Decimal, y: i32, m: u32, d: u32) -> TransactionRecord {
        TransactionRecord {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            kind,
            base_asset: asset.to_string(),
            base_amount: amount,
            quote_asset: "USD".to_string(),
            quote_amount: Decimal::ZERO,
            fee_amount: Decimal::ZERO,
            fee_asset: "USD".to_string(),
            notes: String::new(),
            source_tx: TxId("tx".into()),
            input_index: 0,
        }
    }

    #[test]
    fn flags_negative_balance_on_oversell() {
        let records = vec![
            record(Kind::Buy, "BTC", dec!(1.0), 2024, 1, 1),
            record(Kind::Sell, "BTC", dec!(2.0), 2024, 1, 2),
        ];
        let report = validate(&records, 0, Utc::now());
        assert_eq!(report.negative_balances.len(), 1);
    }

    #[test]
    fn flags_orphan_sell_before_any_acquisition() {
        let records = vec![record(Kind::Sell, "ETH", dec!(1.0), 2024, 1, 1)];
        let report = validate(&records, 0, Utc::now());
        assert_eq!(report.orphan_sells.len(), 1);
    }

    #[test]
    fn flags_duplicate_rows() {
        let records = vec![
            record(Kind::Buy, "BTC", dec!(1.0), 2024, 1, 1),
            record(Kind::Buy, "BTC", dec!(1.0), 2024, 1, 1),
        ];
        let report = validate(&records, 0, Utc::now());
        assert_eq!(report.duplicates_found, 1);
    }

    #[test]
    fn rejects_dates_before_bitcoin_genesis() {
        let records = vec![record(Kind::Buy, "BTC", dec!(1.0), 2005, 1, 1)];
        let report = validate(&records, 0, Utc::now());
        assert_eq!(report.invalid_dates, 1);
    }
}
