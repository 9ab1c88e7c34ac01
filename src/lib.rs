//! GEMSMITH: Steam booster pack crafting arbitrage agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod engine;
pub mod storage;

/// `tracing` target of the sales channel: confirmed crafts and listings.
pub const SALES_TARGET: &str = "sales";
