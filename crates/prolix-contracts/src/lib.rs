pub mod contract;
pub mod error;
pub mod events;
pub mod store;
pub mod trace;
