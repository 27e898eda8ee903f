use crate::model::record::TxId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The disposal policy in effect when a disposal event was produced.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisposalMethod {
    Fifo,
    Lifo,
    Hifo,
}

impl fmt::Display for DisposalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisposalMethod::Fifo => "FIFO",
            DisposalMethod::Lifo => "LIFO",
            DisposalMethod::Hifo => "HIFO",
        })
    }
}

/// A realized sale, withdrawal consumption, or fee consumption of a (sub-)lot
/// (spec §3.5).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DisposalEvent {
    pub date: DateTime<Utc>,
    pub asset: String,
    pub amount: Decimal,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub gain_loss: Decimal,
    pub short_term: bool,
    pub holding_days: i64,
    pub acquired_at: DateTime<Utc>,
    pub method: DisposalMethod,
    pub source_tx: TxId,
    pub note: Option<String>,
}

/// The kind of taxable receipt represented by an [`IncomeEvent`].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeKind {
    Stake,
    Airdrop,
}

impl fmt::Display for IncomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IncomeKind::Stake => "stake",
            IncomeKind::Airdrop => "airdrop",
        })
    }
}

/// A taxable receipt of crypto valued at its fair-market price at receipt
/// (spec §3.6).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IncomeEvent {
    pub date: DateTime<Utc>,
    pub asset: String,
    pub amount: Decimal,
    pub unit_price: Decimal,
    pub value: Decimal,
    pub kind: IncomeKind,
    pub source_tx: TxId,
}
