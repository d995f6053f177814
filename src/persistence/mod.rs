//! On-disk state: the closed-trade ledger and the open-positions snapshot

pub mod ledger;
pub mod snapshot;

pub use ledger::TradeLedger;
pub use snapshot::{PositionSnapshot, PositionSnapshotStore};
