pub mod auction;
pub mod bidding;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod message_broker;
pub mod points;
pub mod query;
pub mod relay;
pub mod scheduler;
pub mod ws;
