//! Tax Engine (C7, spec §4.7).
//!
//! Drives one [`Inventory`] per run over a timestamp-sorted canonical
//! record stream, emitting [`DisposalEvent`]s and [`IncomeEvent`]s.
//! No exception crosses this loop per record (spec §7, §9); failures are
//! accumulated in an [`ErrorCollector`] and the engine moves on.

use crate::basis::inventory::{Inventory, Policy};
use crate::errors::{EngineError, ErrorCollector};
use crate::model::{DisposalEvent, DisposalMethod, IncomeEvent, IncomeKind, Kind, Lot, TransactionRecord};
use crate::oracle::PriceOracle;
use chrono::Duration;
use rust_decimal::Decimal;

const LONG_TERM_HOLDING: i64 = 365;

fn as_disposal_method(policy: Policy) -> DisposalMethod {
    match policy {
        Policy::Fifo => DisposalMethod::Fifo,
        Policy::Lifo => DisposalMethod::Lifo,
        Policy::Hifo => DisposalMethod::Hifo,
    }
}

/// The output of one engine run (spec §4.7 "two event streams ... plus
/// aggregated totals").
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub disposals: Vec<DisposalEvent>,
    pub incomes: Vec<IncomeEvent>,
}

/// Per-asset lot accounting driven by a sorted canonical record stream
/// (spec §4.7).
pub struct TaxEngine<'a> {
    policy: Policy,
    tax_currency: String,
    strict_mode: bool,
    oracle: &'a dyn PriceOracle,
    inventory: Inventory,
}

impl<'a> TaxEngine<'a> {
    pub fn new(policy: Policy, tax_currency: impl Into<String>, strict_mode: bool, oracle: &'a dyn PriceOracle) -> Self {
        Self {
            policy,
            tax_currency: tax_currency.into(),
            strict_mode,
            oracle,
            inventory: Inventory::new(policy),
        }
    }

    /// Returns the open balance remaining for `asset` after the run so far.
    pub fn balance(&self, asset: &str) -> Decimal {
        self.inventory.balance(asset)
    }

    /// Processes `records`, which MUST already be sorted by
    /// `(timestamp, input_index)` (spec §4.7 "Determinism"). Returns the
    /// event streams plus an [`ErrorCollector`] of per-record warnings.
    pub fn run(&mut self, records: &[TransactionRecord]) -> Result<(EngineOutput, ErrorCollector), EngineError> {
        let mut output = EngineOutput::default();
        let mut errors = ErrorCollector::new("engine");

        for record in records {
            if let Err(err) = self.process_one(record, &mut output, &mut errors) {
                if self.strict_mode {
                    return Err(err);
                }
                errors.warn(format!("{}: {err}", record.source_tx));
            }
        }

        Ok((output, errors))
    }

    fn process_one(
        &mut self,
        record: &TransactionRecord,
        output: &mut EngineOutput,
        errors: &mut ErrorCollector,
    ) -> Result<(), EngineError> {
        if record.base_amount.is_zero() {
            return Ok(());
        }

        match record.kind {
            Kind::Buy | Kind::Deposit => self.acquire(record, errors),
            Kind::Sell => self.dispose(record, Decimal::ZERO, output, errors)?,
            Kind::Fee => self.dispose(record, Decimal::ZERO, output, errors)?,
            Kind::Stake | Kind::Airdrop => self.receive_income(record, output, errors),
            Kind::Withdraw | Kind::Transfer => self.consume_silently(record, errors)?,
        }

        Ok(())
    }

    /// Buy / Deposit: add a lot (spec §4.7).
    fn acquire(&mut self, record: &TransactionRecord, errors: &mut ErrorCollector) {
        let cost_basis = if record.quote_amount > Decimal::ZERO {
            record.quote_amount + record.fee_amount
        } else {
            match self.oracle.price(&record.base_asset, record.timestamp, &self.tax_currency) {
                Some(price) => price * record.base_amount + record.fee_amount,
                None => {
                    errors.warn(format!(
                        "{}: no oracle price for {} at {}; cost basis limited to the fee amount",
                        record.source_tx, record.base_asset, record.timestamp
                    ));
                    record.fee_amount
                }
            }
        };

        self.inventory.add_lot(
            &record.base_asset,
            Lot::new(record.base_amount, cost_basis, record.timestamp, record.source_tx.clone()),
        );
    }

    /// Sell: consume lots and emit one disposal event per consumed
    /// sub-lot. Fee-as-disposal shares this path with `proceeds = 0`
    /// (spec §4.7 "Fee").
    fn dispose(
        &mut self,
        record: &TransactionRecord,
        forced_proceeds: Decimal,
        output: &mut EngineOutput,
        errors: &mut ErrorCollector,
    ) -> Result<(), EngineError> {
        let is_fee = record.kind == Kind::Fee;
        let proceeds = if is_fee {
            forced_proceeds
        } else if record.quote_amount > Decimal::ZERO {
            record.quote_amount - record.fee_amount
        } else {
            match self.oracle.price(&record.base_asset, record.timestamp, &self.tax_currency) {
                Some(price) => price * record.base_amount - record.fee_amount,
                None => {
                    errors.warn(format!(
                        "{}: no oracle price for {} at {}; dropping sell row",
                        record.source_tx, record.base_asset, record.timestamp
                    ));
                    return Ok(());
                }
            }
        };

        let consumed = if self.strict_mode {
            self.inventory.remove(&record.base_asset, record.base_amount)?
        } else {
            let available = self.inventory.balance(&record.base_asset);
            if record.base_amount > available {
                errors.warn(format!(
                    "{}: insufficient {} inventory (requested {}, available {}); consuming available balance",
                    record.source_tx, record.base_asset, record.base_amount, available
                ));
            }
            self.inventory.remove_up_to(&record.base_asset, record.base_amount)
        };

        for lot in consumed {
            let lot_proceeds = if record.base_amount.is_zero() {
                Decimal::ZERO
            } else {
                proceeds * lot.amount / record.base_amount
            };
            let gain_loss = lot_proceeds - lot.cost_basis;
            let holding_days = (record.timestamp - lot.acquired_at).num_days();

            output.disposals.push(DisposalEvent {
                date: record.timestamp,
                asset: record.base_asset.clone(),
                amount: lot.amount,
                proceeds: lot_proceeds,
                cost_basis: lot.cost_basis,
                gain_loss,
                short_term: holding_days < LONG_TERM_HOLDING,
                holding_days,
                acquired_at: lot.acquired_at,
                method: as_disposal_method(self.policy),
                source_tx: record.source_tx.clone(),
                note: is_fee.then(|| "fee consumption".to_string()),
            });
        }

        Ok(())
    }

    /// Stake / Airdrop: emit income valued at the oracle price, then add a
    /// lot with cost basis equal to that income value (spec §4.7).
    fn receive_income(&mut self, record: &TransactionRecord, output: &mut EngineOutput, errors: &mut ErrorCollector) {
        let Some(price) = self.oracle.price(&record.base_asset, record.timestamp, &self.tax_currency) else {
            errors.warn(format!(
                "{}: no oracle price for {} at {}; skipping income event",
                record.source_tx, record.base_asset, record.timestamp
            ));
            return;
        };

        let value = price * record.base_amount;
        let kind = match record.kind {
            Kind::Stake => IncomeKind::Stake,
            Kind::Airdrop => IncomeKind::Airdrop,
            _ => unreachable!("receive_income is only called for Stake/Airdrop"),
        };

        output.incomes.push(IncomeEvent {
            date: record.timestamp,
            asset: record.base_asset.clone(),
            amount: record.base_amount,
            unit_price: price,
            value,
            kind,
            source_tx: record.source_tx.clone(),
        });

        self.inventory
            .add_lot(&record.base_asset, Lot::new(record.base_amount, value, record.timestamp, record.source_tx.clone()));
    }

    /// Withdraw / Transfer: non-taxable consumption (spec §4.7).
    fn consume_silently(&mut self, record: &TransactionRecord, errors: &mut ErrorCollector) -> Result<(), EngineError> {
        if self.strict_mode {
            self.inventory.remove(&record.base_asset, record.base_amount)?;
        } else {
            let available = self.inventory.balance(&record.base_asset);
            if record.base_amount > available {
                errors.warn(format!(
                    "{}: insufficient {} inventory for non-taxable withdrawal (requested {}, available {})",
                    record.source_tx, record.base_asset, record.base_amount, available
                ));
            }
            self.inventory.remove_up_to(&record.base_asset, record.base_amount);
        }
        Ok(())
    }
}

/// `true` iff `sell - acquired` is shorter than the long-term threshold
/// (spec §8.1 "short-term classification").
pub fn is_short_term(acquired_at: chrono::DateTime<chrono::Utc>, sold_at: chrono::DateTime<chrono::Utc>) -> bool {
    (sold_at - acquired_at) < Duration::days(LONG_TERM_HOLDING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::TxId;
    use crate::oracle::FixedTableOracle;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn record(kind: Kind, asset: &str, amount: Decimal, quote_amount: Decimal, fee: Decimal, y: i32, m: u32, d: u32, idx: usize) -> TransactionRecord {
        TransactionRecord {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            kind,
            base_asset: asset.to_string(),
            base_amount: amount,
            quote_asset: "USD".to_string(),
            quote_amount,
            fee_amount: fee,
            fee_asset: "USD".to_string(),
            notes: String::new(),
            source_tx: TxId(format!("tx{idx}")),
            input_index: idx,
        }
    }

    #[test]
    fn simple_fifo_gain_matches_scenario_1() {
        let oracle = FixedTableOracle::new();
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);

        let records = vec![
            record(Kind::Buy, "BTC", dec!(1.0), dec!(50000), dec!(25), 2024, 1, 1, 0),
            record(Kind::Sell, "BTC", dec!(0.5), dec!(30000), dec!(15), 2024, 6, 1, 1),
        ];

        let (output, errors) = engine.run(&records).unwrap();
        assert!(!errors.has_errors());
        assert_eq!(output.disposals.len(), 1);

        let d = &output.disposals[0];
        assert_eq!(d.amount, dec!(0.5));
        assert_eq!(d.cost_basis, dec!(25012.50));
        assert_eq!(d.proceeds, dec!(29985.00));
        assert_eq!(d.gain_loss, dec!(4972.50));
        assert!(d.short_term);
    }

    #[test]
    fn long_term_threshold_matches_scenario_2() {
        let oracle = FixedTableOracle::new();
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);

        let records = vec![
            record(Kind::Buy, "BTC", dec!(1.0), dec!(30000), dec!(15), 2023, 1, 1, 0),
            record(Kind::Sell, "BTC", dec!(1.0), dec!(50000), dec!(25), 2024, 6, 1, 1),
        ];

        let (output, _) = engine.run(&records).unwrap();
        assert!(!output.disposals[0].short_term);
    }

    #[test]
    fn fifo_lifo_hifo_diverge_on_scenario_3() {
        let oracle = FixedTableOracle::new();
        let make_records = || {
            vec![
                record(Kind::Buy, "BTC", dec!(1.0), dec!(40000), dec!(20), 2023, 1, 1, 0),
                record(Kind::Buy, "BTC", dec!(1.0), dec!(60000), dec!(30), 2023, 6, 1, 1),
                record(Kind::Sell, "BTC", dec!(1.0), dec!(55000), dec!(27.5), 2024, 1, 1, 2),
            ]
        };

        let mut fifo = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);
        let (fifo_out, _) = fifo.run(&make_records()).unwrap();
        assert_eq!(fifo_out.disposals[0].gain_loss, dec!(14952.50));

        let mut lifo = TaxEngine::new(Policy::Lifo, "USD", false, &oracle);
        let (lifo_out, _) = lifo.run(&make_records()).unwrap();
        assert_eq!(lifo_out.disposals[0].gain_loss, dec!(-5057.50));

        let mut hifo = TaxEngine::new(Policy::Hifo, "USD", false, &oracle);
        let (hifo_out, _) = hifo.run(&make_records()).unwrap();
        assert_eq!(hifo_out.disposals[0].gain_loss, dec!(-5057.50));
    }

    #[test]
    fn stake_then_sale_matches_scenario_4() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let oracle = FixedTableOracle::new().with_price("ETH", date, "USD", dec!(3000));
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);

        let records = vec![
            record(Kind::Stake, "ETH", dec!(1.0), Decimal::ZERO, Decimal::ZERO, 2024, 1, 1, 0),
            record(Kind::Sell, "ETH", dec!(1.0), dec!(3500), Decimal::ZERO, 2024, 6, 1, 1),
        ];

        let (output, _) = engine.run(&records).unwrap();
        assert_eq!(output.incomes[0].value, dec!(3000));
        assert_eq!(output.disposals[0].cost_basis, dec!(3000));
        assert_eq!(output.disposals[0].proceeds, dec!(3500));
        assert_eq!(output.disposals[0].gain_loss, dec!(500));
        assert!(output.disposals[0].short_term);
    }

    #[test]
    fn fee_as_disposal_matches_scenario_5() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let oracle = FixedTableOracle::new().with_price("ETH", date, "USD", dec!(3500));
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);

        let records = vec![
            record(Kind::Buy, "ETH", dec!(0.1), dec!(30), Decimal::ZERO, 2024, 1, 1, 0),
            record(Kind::Fee, "ETH", dec!(0.01), Decimal::ZERO, Decimal::ZERO, 2024, 3, 1, 1),
        ];

        let (output, _) = engine.run(&records).unwrap();
        let fee_disposal = &output.disposals[0];
        assert_eq!(fee_disposal.amount, dec!(0.01));
        assert_eq!(fee_disposal.proceeds, Decimal::ZERO);
        assert_eq!(fee_disposal.cost_basis, dec!(3));
        assert_eq!(fee_disposal.gain_loss, dec!(-3));
    }

    #[test]
    fn zero_amount_rows_emit_no_events() {
        let oracle = FixedTableOracle::new();
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", false, &oracle);
        let records = vec![record(Kind::Buy, "BTC", Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, 2024, 1, 1, 0)];

        let (output, _) = engine.run(&records).unwrap();
        assert!(output.disposals.is_empty());
        assert!(output.incomes.is_empty());
    }

    #[test]
    fn insufficient_inventory_in_strict_mode_is_an_error() {
        let oracle = FixedTableOracle::new();
        let mut engine = TaxEngine::new(Policy::Fifo, "USD", true, &oracle);
        let records = vec![record(Kind::Sell, "BTC", dec!(1.0), dec!(1000), Decimal::ZERO, 2024, 1, 1, 0)];

        assert!(engine.run(&records).is_err());
    }
}
