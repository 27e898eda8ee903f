pub mod events;
pub mod lot;
pub mod mapping;
pub mod record;

pub use events::{DisposalEvent, DisposalMethod, IncomeEvent, IncomeKind};
pub use lot::Lot;
pub use mapping::{ExchangeMapping, CANONICAL_LABELS};
pub use record::{Kind, TransactionRecord};
