use crate::model::record::TxId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A tax lot: a quantity of an asset acquired at a definite cost (spec §3.3).
///
/// `unit_cost` is derived, not stored, so a lot can never carry a stale
/// cached value after a split.
#[derive(Clone, Debug, PartialEq)]
pub struct Lot {
    pub amount: Decimal,
    pub cost_basis: Decimal,
    pub acquired_at: DateTime<Utc>,
    pub source_tx: TxId,
}

impl Lot {
    pub fn new(amount: Decimal, cost_basis: Decimal, acquired_at: DateTime<Utc>, source_tx: TxId) -> Self {
        Self {
            amount,
            cost_basis,
            acquired_at,
            source_tx,
        }
    }

    pub fn unit_cost(&self) -> Decimal {
        if self.amount.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_basis / self.amount
        }
    }

    /// Splits off `take_amount` from this lot, proportionally allocating
    /// cost basis, and mutates `self` into the residual lot (spec §3.3).
    ///
    /// Panics if `take_amount` is not in `(0, self.amount]`; callers are
    /// expected to have already checked that invariant (see `basis::inventory`).
    pub fn split(&mut self, take_amount: Decimal) -> Lot {
        debug_assert!(take_amount > Decimal::ZERO);
        debug_assert!(take_amount <= self.amount);

        let taken_cost = self.cost_basis * take_amount / self.amount;
        let taken = Lot {
            amount: take_amount,
            cost_basis: taken_cost,
            acquired_at: self.acquired_at,
            source_tx: self.source_tx.clone(),
        };

        self.amount -= take_amount;
        self.cost_basis -= taken_cost;

        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn split_preserves_amount_and_basis() {
        let mut lot = Lot::new(dec!(1.0), dec!(40020), at(2024, 1, 1), TxId("tx1".into()));
        let taken = lot.split(dec!(0.5));

        assert_eq!(taken.amount, dec!(0.5));
        assert_eq!(taken.amount + lot.amount, dec!(1.0));
        assert_eq!(taken.cost_basis + lot.cost_basis, dec!(40020));
    }

    #[test]
    fn splitting_the_full_amount_leaves_zero_residual() {
        let mut lot = Lot::new(dec!(1.0), dec!(100), at(2024, 1, 1), TxId("tx1".into()));
        let taken = lot.split(dec!(1.0));

        assert_eq!(taken.amount, dec!(1.0));
        assert_eq!(lot.amount, Decimal::ZERO);
        assert_eq!(lot.cost_basis, Decimal::ZERO);
    }
}
