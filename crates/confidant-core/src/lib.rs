//! Confidant core — conversation types, durable store, bus, config, and stats.

pub mod bus;
pub mod config;
pub mod error;
pub mod session;
pub mod stats;
pub mod types;
pub mod utils;

pub use error::{StoreError, StoreResult};
pub use stats::{StatsCounter, StatsSnapshot};
