pub mod client;
pub mod event;
pub mod hub;
pub mod participants;
pub mod upgrade;

pub use client::{Client, ClientId, Identity, Role};
pub use hub::{Hub, HubHandle};
pub use participants::{NoActivity, ParticipantDirectory, StoreDirectory};
