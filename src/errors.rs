//! Component error taxonomy (spec §7).
//!
//! Each component owns a focused `thiserror::Error` enum. `Error` aggregates
//! all of them at the CLI boundary via `#[from]`, matching the original
//! crate's `main.rs` error-aggregation pattern.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse exchange mapping document: {0}")]
    ConfigError(String),

    #[error("unknown exchange id: {0}")]
    UnknownExchange(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("no training data available for the column classifier")]
    ModelUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize classifier model: {0}")]
    Serde(String),
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("file is not in a recognizable tabular format: {0}")]
    InvalidFormat(String),

    #[error("no exchange mapping matched this file")]
    NoMatch,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("input file not found: {0}")]
    FileNotFound(String),

    #[error("file is not in a recognizable tabular format: {0}")]
    InvalidFormat(String),

    #[error("input file has no data rows")]
    EmptyData,

    #[error("unknown exchange id: {0}")]
    UnknownExchange(String),

    #[error("required canonical fields unresolved after classification: {0:?}")]
    MappingInsufficient(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("validation failed in strict mode: {0} fatal error(s)")]
    Fatal(usize),
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("insufficient inventory for {asset}: requested {requested}, available {available}")]
    InsufficientInventory {
        asset: String,
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("price request timed out")]
    Timeout,

    #[error(transparent)]
    Transport(#[from] Box<ureq::Error>),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level aggregate error surfaced at the CLI boundary (spec §10.2).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

impl Error {
    /// Maps to the CLI exit code taxonomy (spec §6.4).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) | Error::Registry(RegistryError::UnknownExchange(_)) => 1,
            Error::Normalize(NormalizeError::FileNotFound(_)) => 1,
            Error::Normalize(NormalizeError::UnknownExchange(_)) => 1,
            Error::Validate(ValidateError::Fatal(_)) => 2,
            _ => 3,
        }
    }
}

/// Accumulates non-fatal errors and warnings for a single operation,
/// surfaced in the caller's report rather than raised (spec §4.10, §10.5).
///
/// Grounded on the original crate's `exceptions.py::ErrorCollector` utility.
#[derive(Clone, Debug, Default)]
pub struct ErrorCollector {
    context: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ErrorCollector {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(context = %self.context, %message);
        self.errors.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(context = %self.context, %message);
        self.warnings.push(message);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn warn_emits_a_tracing_event_with_context_and_message() {
        let mut collector = ErrorCollector::new("kraken.csv");
        collector.warn("unparseable timestamp on row 3");

        assert!(collector.has_warnings());
        assert!(logs_contain("unparseable timestamp on row 3"));
        assert!(logs_contain("kraken.csv"));
    }

    #[test]
    #[traced_test]
    fn error_emits_a_tracing_event_distinct_from_warnings() {
        let mut collector = ErrorCollector::new("coinbase.csv");
        collector.error("missing required column: Timestamp");

        assert!(collector.has_errors());
        assert!(!collector.has_warnings());
        assert!(logs_contain("missing required column"));
    }
}
