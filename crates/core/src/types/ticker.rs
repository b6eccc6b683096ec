//! Source-venue top-of-book snapshot.
//!
//! [`BookTicker`] is the primary input to the quote engine on every source
//! update. It carries the local receive time so staleness can be judged
//! without trusting the venue clock.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::order::Symbol;
use super::price::Price;
use super::quantity::Quantity;

/// Validation failure for a top-of-book snapshot.
#[derive(Debug, Clone, Error)]
pub enum TickerError {
    /// Bid or ask is missing or non-positive.
    #[error("non-positive top of book: bid={bid}, ask={ask}")]
    NonPositive { bid: Price, ask: Price },
    /// Bid at or above ask.
    #[error("crossed top of book: bid={bid} >= ask={ask}")]
    Crossed { bid: Price, ask: Price },
}

/// Best bid and offer for the source instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTicker {
    /// Source-venue trading pair.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid_px: Price,
    /// Quantity resting at the best bid.
    pub bid_qty: Quantity,
    /// Best ask price.
    pub ask_px: Price,
    /// Quantity resting at the best ask.
    pub ask_qty: Quantity,
    /// Local receive time, seconds since epoch.
    pub ts: f64,
}

impl BookTicker {
    /// Enforce `bid > 0`, `ask > 0`, `bid < ask`.
    pub fn validate(&self) -> Result<(), TickerError> {
        if !self.bid_px.is_positive() || !self.ask_px.is_positive() {
            return Err(TickerError::NonPositive {
                bid: self.bid_px,
                ask: self.ask_px,
            });
        }
        if self.bid_px >= self.ask_px {
            return Err(TickerError::Crossed {
                bid: self.bid_px,
                ask: self.ask_px,
            });
        }
        Ok(())
    }

    /// Mid price as `(bid + ask) / 2` in `f64` for derivation math.
    pub fn mid(&self) -> f64 {
        (self.bid_px.to_f64() + self.ask_px.to_f64()) / 2.0
    }

    /// Returns `true` if the snapshot is older than `stale_ms`.
    pub fn is_stale(&self, now: f64, stale_ms: u64) -> bool {
        (now - self.ts) * 1000.0 > stale_ms as f64
    }
}
