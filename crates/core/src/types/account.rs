//! Account aggregates: per-symbol positions and per-asset balances.
//!
//! Both are ever-living rows updated only by the reconciler path; the OMS
//! reads them for risk decisions and status reporting.

use serde::{Deserialize, Serialize};

use super::order::Symbol;
use super::price::Price;
use super::quantity::Quantity;

/// Net position in one destination-venue symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Trading pair.
    pub symbol: Symbol,
    /// Signed net quantity (positive long, negative short).
    pub quantity: Quantity,
    /// Volume-weighted average entry price of the open position.
    pub avg_entry_price: Price,
    /// Cumulative realized P&L in quote-asset units, net of commission.
    pub realized_pnl: Price,
    /// Last mark-to-market unrealized P&L. Derived, recomputed on demand.
    pub unrealized_pnl: Price,
    /// Last update time, seconds since epoch.
    pub last_update: f64,
}

impl Position {
    /// A flat position for `symbol`.
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Quantity::zero(Quantity::DEFAULT_SCALE),
            avg_entry_price: Price::zero(Price::DEFAULT_SCALE),
            realized_pnl: Price::zero(Price::DEFAULT_SCALE),
            unrealized_pnl: Price::zero(Price::DEFAULT_SCALE),
            last_update: 0.0,
        }
    }

    /// Returns `true` if no position is open.
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Absolute notional value at the average entry price.
    pub fn notional(&self) -> f64 {
        self.quantity.to_f64().abs() * self.avg_entry_price.to_f64()
    }
}

/// Balance of one asset on the destination venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Asset ticker (e.g., "ADA", "USDM").
    pub asset: String,
    /// Freely usable amount.
    pub available: Quantity,
    /// Amount locked in open orders.
    pub locked: Quantity,
    /// `available + locked`.
    pub total: Quantity,
    /// Last update time, seconds since epoch.
    pub updated_at: f64,
}

impl Balance {
    /// Build a balance, deriving `total`.
    pub fn new(asset: impl Into<String>, available: Quantity, locked: Quantity, updated_at: f64) -> Self {
        Self {
            asset: asset.into(),
            available,
            locked,
            total: available + locked,
            updated_at,
        }
    }
}
