//! valkeyctl library crate.
//!
//! A command-line administrator for sharded Valkey clusters: bootstrap,
//! node lifecycle, slot migration, rebalancing, bulk loading, and health
//! auditing over the store's native administrative command set.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod report;
pub mod settings;
pub mod slots;

pub use error::AdminError;
pub use settings::Settings;
