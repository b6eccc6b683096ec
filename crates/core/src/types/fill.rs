//! Execution (fill) records from the destination venue.

use serde::{Deserialize, Serialize};

use super::order::{OrderId, Side, Symbol};
use super::price::Price;
use super::quantity::Quantity;

/// A single execution against one of our orders.
///
/// `fill_id` is the venue's execution id and the sole deduplication key:
/// the account stream can replay fills across reconnects, and the same id
/// must never be applied twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Venue execution id, globally unique.
    pub fill_id: String,
    /// Our order this execution belongs to.
    pub order_id: OrderId,
    /// Trading pair.
    pub symbol: Symbol,
    /// Side of our order.
    pub side: Side,
    /// Execution price.
    pub price: Price,
    /// Executed quantity.
    pub quantity: Quantity,
    /// Venue execution time, seconds since epoch. Display only; ordering
    /// correctness relies on `fill_id` uniqueness.
    pub executed_at: f64,
    /// Venue trade id, when distinct from the execution id.
    pub trade_id: Option<String>,
    /// Fee charged for this execution.
    pub commission: Price,
    /// Asset the fee was charged in.
    pub commission_asset: Option<String>,
    /// `true` when our order rested on the book.
    pub is_maker: bool,
}
