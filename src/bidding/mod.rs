pub mod commands;
pub mod memory;
pub mod model;
pub mod store;

pub use commands::{BidPlacementEngine, PlaceBidCommand, PlaceBidOutcome};
pub use memory::MemoryBidStore;
pub use store::{BidCommit, BidStore, PostgresBidStore};
