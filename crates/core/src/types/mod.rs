//! Core domain types shared across the engine.
//!
//! Monetary values are fixed-point decimals with explicit venue rounding;
//! wall-clock times are seconds-since-epoch `f64` values produced by the
//! [`crate::clock::Clock`].

pub mod account;
pub mod fill;
pub mod order;
pub mod outbox;
pub mod price;
pub mod quantity;
pub mod quote;
pub mod ticker;

// Re-export primary types for convenient access via `xmaker_core::types::*`.
pub use account::{Balance, Position};
pub use fill::Fill;
pub use order::{Order, OrderId, OrderState, OrderType, Side, Symbol, VenueOrderId};
pub use outbox::{OutboxEvent, OutboxEventKind, OutboxStatus};
pub use price::Price;
pub use quantity::Quantity;
pub use quote::{Quote, QuoteLayer, QuoteStatus};
pub use ticker::{BookTicker, TickerError};
