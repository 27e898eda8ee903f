//! Lot Inventory (C6, spec §4.6).

pub mod inventory;

pub use inventory::{Inventory, Policy};
