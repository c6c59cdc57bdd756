pub mod ledger;
pub mod repository;

pub use ledger::{BidderPoints, LedgerContext, LedgerEntry, PointHistory, PointHistoryType};
pub use repository::PointsLedger;
