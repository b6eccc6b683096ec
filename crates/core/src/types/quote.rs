//! Multi-layer quote entity.
//!
//! A [`Quote`] is the quote engine's output: for each enabled side, an
//! ordered list of (price, quantity) layers derived from one source
//! top-of-book snapshot. Quotes are persisted and tracked through a small
//! lifecycle of their own so the pipeline can tell which orders belong to
//! which pricing decision.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::Symbol;
use super::price::Price;
use super::quantity::Quantity;
use super::ticker::BookTicker;

/// Quote lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Derived by the engine, not yet persisted.
    Generated,
    /// Written to the store.
    Persisted,
    /// Child orders created in the OMS.
    OrdersCreated,
    /// Child orders handed to the outbox.
    OrdersSubmitted,
    /// TTL elapsed before submission completed.
    Expired,
    /// Superseded or explicitly cancelled.
    Cancelled,
}

impl QuoteStatus {
    /// Parse from the snake_case wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generated" => Some(QuoteStatus::Generated),
            "persisted" => Some(QuoteStatus::Persisted),
            "orders_created" => Some(QuoteStatus::OrdersCreated),
            "orders_submitted" => Some(QuoteStatus::OrdersSubmitted),
            "expired" => Some(QuoteStatus::Expired),
            "cancelled" => Some(QuoteStatus::Cancelled),
            _ => None,
        }
    }

    /// snake_case wire form (also the column value in the store).
    pub const fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Generated => "generated",
            QuoteStatus::Persisted => "persisted",
            QuoteStatus::OrdersCreated => "orders_created",
            QuoteStatus::OrdersSubmitted => "orders_submitted",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for statuses that still map to live orders.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Persisted | QuoteStatus::OrdersCreated | QuoteStatus::OrdersSubmitted
        )
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One price level of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLayer {
    /// Layer price, already snapped to the venue tick.
    pub price: Price,
    /// Layer size, already snapped to the venue step.
    pub quantity: Quantity,
}

/// A multi-layer quote derived from one source top-of-book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Unique quote id (UUID v4).
    pub quote_id: String,
    /// Derivation time, seconds since epoch.
    pub ts: f64,
    /// Source-venue pair the reference prices came from.
    pub symbol_src: Symbol,
    /// Destination-venue pair being quoted.
    pub symbol_dst: Symbol,
    /// The source snapshot this quote was derived from.
    pub source: BookTicker,
    /// Bid layers, best (highest) first. Empty if the side is disabled.
    pub bid_layers: Vec<QuoteLayer>,
    /// Ask layers, best (lowest) first. Empty if the side is disabled.
    pub ask_layers: Vec<QuoteLayer>,
    /// First-layer spread in basis points, when both sides are present.
    pub spread_bps: Option<f64>,
    /// Lifecycle status.
    pub status: QuoteStatus,
    /// Expiry time, seconds since epoch (`ts` + quote TTL).
    pub expires_at: f64,
}

impl Quote {
    /// Best bid layer, if the bid side is quoted.
    pub fn best_bid(&self) -> Option<&QuoteLayer> {
        self.bid_layers.first()
    }

    /// Best ask layer, if the ask side is quoted.
    pub fn best_ask(&self) -> Option<&QuoteLayer> {
        self.ask_layers.first()
    }

    /// Total number of layers across both sides.
    pub fn layer_count(&self) -> usize {
        self.bid_layers.len() + self.ask_layers.len()
    }

    /// First-layer spread in basis points, computed from the layers.
    pub fn compute_spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?.price.to_f64();
        let ask = self.best_ask()?.price.to_f64();
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// Returns `true` once `expires_at` has passed.
    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.expires_at
    }
}
