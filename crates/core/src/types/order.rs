//! Order primitives: identifiers, side, type, lifecycle states, and the
//! persisted order record.
//!
//! The state machine lives here as a pure transition table so that both the
//! OMS (which enforces it) and the store (which persists it) agree on what a
//! legal transition is.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::price::Price;
use super::quantity::Quantity;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl Side {
    /// Parse from the lowercase wire form used by the store and the venue.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Lowercase wire form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Resting limit order with a price.
    Limit,
    /// Market order, fills at the best available price.
    Market,
}

impl OrderType {
    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            _ => None,
        }
    }

    /// Lowercase wire form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Created locally, not yet accepted by the OMS.
    Idle,
    /// Accepted by the OMS; an outbox event carries it to the venue.
    Pending,
    /// Acknowledged by the venue and resting on the book.
    Working,
    /// Fully filled; terminal.
    Filled,
    /// Cancel confirmed by the venue; terminal.
    Cancelled,
    /// Rejected by risk or by the venue; terminal.
    Rejected,
    /// Delivery permanently failed (outbox dead letter); terminal.
    Failed,
}

impl OrderState {
    /// Returns `true` if this state admits no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Failed
        )
    }

    /// Returns `true` if the transition `self -> to` is legal.
    ///
    /// idle -> {pending, rejected}; pending -> {working, rejected, failed};
    /// working -> {filled, cancelled, rejected}; terminal states are final.
    pub const fn can_transition_to(&self, to: OrderState) -> bool {
        matches!(
            (self, to),
            (OrderState::Idle, OrderState::Pending)
                | (OrderState::Idle, OrderState::Rejected)
                | (OrderState::Pending, OrderState::Working)
                | (OrderState::Pending, OrderState::Rejected)
                | (OrderState::Pending, OrderState::Failed)
                | (OrderState::Working, OrderState::Filled)
                | (OrderState::Working, OrderState::Cancelled)
                | (OrderState::Working, OrderState::Rejected)
        )
    }

    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(OrderState::Idle),
            "pending" => Some(OrderState::Pending),
            "working" => Some(OrderState::Working),
            "filled" => Some(OrderState::Filled),
            "cancelled" => Some(OrderState::Cancelled),
            "rejected" => Some(OrderState::Rejected),
            "failed" => Some(OrderState::Failed),
            _ => None,
        }
    }

    /// Lowercase wire form (also the column value in the store).
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderState::Idle => "idle",
            OrderState::Pending => "pending",
            OrderState::Working => "working",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
            OrderState::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-generated order identifier, unique per process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    /// Create an order id from any string-like value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-assigned order identifier, known after the submit ack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueOrderId(pub String);

impl fmt::Display for VenueOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trading pair symbol (e.g., "ADAUSDM").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a new symbol.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client-generated unique identifier.
    pub order_id: OrderId,
    /// Quote that spawned this order, if any.
    pub quote_id: Option<String>,
    /// Destination-venue trading pair.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Limit or market.
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    /// Total order quantity.
    pub quantity: Quantity,
    /// Cumulative filled quantity.
    pub filled_qty: Quantity,
    /// Volume-weighted average fill price (zero until the first fill).
    pub avg_fill_px: Price,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Venue-assigned id, set on ack.
    pub external_order_id: Option<VenueOrderId>,
    /// Last error or rejection reason, if any.
    pub error_message: Option<String>,
    /// Creation time, seconds since epoch.
    pub created_at: f64,
    /// Last update time, seconds since epoch.
    pub updated_at: f64,
}

impl Order {
    /// Quantity still open on the venue.
    pub fn remaining_qty(&self) -> Quantity {
        self.quantity - self.filled_qty
    }

    /// Returns `true` if the order is in a terminal state.
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_roundtrip() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("sell"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
        assert_eq!(Side::Buy.as_str(), "buy");
    }

    #[test]
    fn test_order_type_roundtrip() {
        assert_eq!(OrderType::parse("limit"), Some(OrderType::Limit));
        assert_eq!(OrderType::parse("market"), Some(OrderType::Market));
        assert_eq!(OrderType::parse("stop"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderState::Idle.is_terminal());
        assert!(!OrderState::Pending.is_terminal());
        assert!(!OrderState::Working.is_terminal());
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
        assert!(OrderState::Failed.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(OrderState::Idle.can_transition_to(OrderState::Pending));
        assert!(OrderState::Idle.can_transition_to(OrderState::Rejected));
        assert!(OrderState::Pending.can_transition_to(OrderState::Working));
        assert!(OrderState::Pending.can_transition_to(OrderState::Rejected));
        assert!(OrderState::Pending.can_transition_to(OrderState::Failed));
        assert!(OrderState::Working.can_transition_to(OrderState::Filled));
        assert!(OrderState::Working.can_transition_to(OrderState::Cancelled));
        assert!(OrderState::Working.can_transition_to(OrderState::Rejected));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!OrderState::Idle.can_transition_to(OrderState::Working));
        assert!(!OrderState::Idle.can_transition_to(OrderState::Filled));
        assert!(!OrderState::Pending.can_transition_to(OrderState::Filled));
        assert!(!OrderState::Pending.can_transition_to(OrderState::Cancelled));
        assert!(!OrderState::Working.can_transition_to(OrderState::Pending));
        assert!(!OrderState::Working.can_transition_to(OrderState::Failed));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        let terminals = [
            OrderState::Filled,
            OrderState::Cancelled,
            OrderState::Rejected,
            OrderState::Failed,
        ];
        let all = [
            OrderState::Idle,
            OrderState::Pending,
            OrderState::Working,
            OrderState::Filled,
            OrderState::Cancelled,
            OrderState::Rejected,
            OrderState::Failed,
        ];
        for from in terminals {
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "{from} -> {to} must be illegal"
                );
            }
        }
    }

    #[test]
    fn test_state_wire_roundtrip() {
        for state in [
            OrderState::Idle,
            OrderState::Pending,
            OrderState::Working,
            OrderState::Filled,
            OrderState::Cancelled,
            OrderState::Rejected,
            OrderState::Failed,
        ] {
            assert_eq!(OrderState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OrderState::parse("unknown"), None);
    }

    #[test]
    fn test_remaining_qty() {
        let order = Order {
            order_id: OrderId::new("ord-1"),
            quote_id: None,
            symbol: Symbol::new("ADAUSDM"),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(Price::new(4998, 4)),
            quantity: Quantity::from(100.0),
            filled_qty: Quantity::from(40.0),
            avg_fill_px: Price::from(0.4998),
            state: OrderState::Working,
            external_order_id: None,
            error_message: None,
            created_at: 0.0,
            updated_at: 0.0,
        };
        assert_eq!(order.remaining_qty(), Quantity::from(60.0));
        assert!(!order.is_complete());
    }
}
