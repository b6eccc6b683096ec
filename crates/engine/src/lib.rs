//! # xmaker-engine
//!
//! Top-level wiring for the cross-venue market maker: the reconciler that
//! applies account-stream events, the quote→order pipeline, the periodic
//! cleanup sweep, status reporting, and the [`engine::Engine`] supervisor
//! that assembles everything from configuration.

pub mod cleanup;
pub mod engine;
pub mod pipeline;
pub mod reconciler;
pub mod status;

pub use engine::Engine;
