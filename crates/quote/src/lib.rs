//! # xmaker-quote
//!
//! Pure quote derivation: turns a source top-of-book snapshot, the current
//! inventory skew, and the trading configuration into a symmetric
//! multi-layer quote for the destination venue. Nothing in this crate
//! suspends or touches I/O.

pub mod engine;
pub mod skew;

pub use engine::{QuoteEngine, QuoteError};
pub use skew::SkewGauge;
