//! # xmaker-core
//!
//! Shared foundation for the xmaker cross-venue market-making engine:
//! fixed-point money types with explicit venue rounding, the persisted
//! domain entities (quotes, orders, fills, positions, balances, outbox
//! events), an injectable clock, layered configuration, and logging setup.

pub mod clock;
pub mod config;
pub mod logging;
pub mod types;
