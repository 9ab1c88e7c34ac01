//! Core engine: the evaluate → craft → sell loop.

pub mod agent;
pub mod availability;
pub mod cache;
pub mod crafter;
pub mod evaluator;
pub mod seller;
