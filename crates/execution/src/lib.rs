//! # xmaker-execution
//!
//! Outbound order plumbing for the destination venue: the token-bucket
//! rate limiter, the REST client with transient/terminal error
//! classification, transaction signing, and the [`VenueGateway`] seam the
//! outbox worker dispatches through.

pub mod client;
pub mod gateway;
pub mod rate_limiter;
pub mod signing;

pub use client::{DestClient, VenueError, VenueOpenOrder};
pub use gateway::{DestGateway, GatewayAck, GatewaySubmit, PaperGateway, VenueGateway};
pub use rate_limiter::{RateLimiter, RateLimiterStatus};
pub use signing::{OperationKeySigner, TxSigner};
