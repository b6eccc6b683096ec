//! # xmaker-outbox
//!
//! Dispatch side of the transactional outbox. The OMS writes side-effect
//! events in the same transaction as the state they belong to; the workers
//! here deliver them to the destination venue with at-least-once
//! semantics, rate limiting, per-aggregate FIFO, and bounded retries.

pub mod worker;

pub use worker::{OutboxWorker, RetryPolicy};
