use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for a canonical transaction record.
///
/// Most exchange exports don't carry a stable id; when absent, the
/// normalizer synthesizes one from the input file name and row index.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TxId(pub String);

impl TxId {
    pub fn synthesize(source: &str, row_index: usize) -> Self {
        Self(format!("{source}#{row_index}"))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Transaction kind, normalized from whatever string an exchange export used.
///
/// Unrecognized strings parse to [`Kind::Transfer`]; the caller is expected
/// to have recorded a warning at the parse site (see `normalize`).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Buy,
    Sell,
    Deposit,
    Withdraw,
    Stake,
    Airdrop,
    Transfer,
    Fee,
}

impl Kind {
    /// Parses a lowercased exchange-supplied transaction type string.
    ///
    /// Returns `None` only for the empty string; any other unrecognized
    /// value maps to `Kind::Transfer` per the documented default policy.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }
        Some(match s.as_str() {
            "buy" => Kind::Buy,
            "sell" => Kind::Sell,
            "deposit" => Kind::Deposit,
            "withdraw" | "withdrawal" => Kind::Withdraw,
            "stake" | "staking" | "reward" | "interest" => Kind::Stake,
            "airdrop" => Kind::Airdrop,
            "fee" => Kind::Fee,
            _ => Kind::Transfer,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Buy => "buy",
            Kind::Sell => "sell",
            Kind::Deposit => "deposit",
            Kind::Withdraw => "withdraw",
            Kind::Stake => "stake",
            Kind::Airdrop => "airdrop",
            Kind::Transfer => "transfer",
            Kind::Fee => "fee",
        }
    }

    /// Kinds that increase a per-asset running balance / add lots to inventory.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Kind::Buy | Kind::Deposit | Kind::Stake | Kind::Airdrop)
    }

    /// Kinds that decrease a per-asset running balance / consume lots.
    pub fn is_disposal(&self) -> bool {
        matches!(self, Kind::Sell | Kind::Withdraw | Kind::Fee)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The exchange-agnostic canonical transaction record (spec §3.1).
///
/// Immutable after construction; the normalizer is the only producer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransactionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: Kind,
    pub base_asset: String,
    pub base_amount: Decimal,
    pub quote_asset: String,
    pub quote_amount: Decimal,
    pub fee_amount: Decimal,
    pub fee_asset: String,
    pub notes: String,
    #[serde(default)]
    pub source_tx: TxId,
    /// Position in the original input, used to break timestamp ties
    /// deterministically (spec §4.7, §5).
    #[serde(default)]
    pub input_index: usize,
}

impl TransactionRecord {
    /// Sort key matching the normalizer's output ordering (spec §4.4 step 11).
    pub fn sort_key(&self) -> (DateTime<Utc>, String, &'static str) {
        (self.timestamp, self.base_asset.clone(), self.kind.as_str())
    }
}
