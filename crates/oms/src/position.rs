//! Position accounting.
//!
//! One [`Position`] per destination symbol, updated only through
//! [`PositionBook::apply_fill`]. The accounting rules:
//!
//! - same-signed fills re-VWAP the entry price;
//! - reductions realize `qty_closed · (price − avg) · sign(position)` and
//!   preserve the average;
//! - a flip adopts the fill price as the residual side's new average;
//! - commission is charged against realized P&L in quote units, converting
//!   at the fill price when the fee was paid in base.
//!
//! P&L math uses `to_f64()`; it is off the order hot path.

use dashmap::DashMap;

use xmaker_core::types::{Fill, Position, Price, Quantity, Side, Symbol};

/// Result of applying one fill to the book.
#[derive(Debug, Clone)]
pub struct PositionUpdate {
    /// Snapshot of the position after the fill.
    pub position: Position,
    /// Realized P&L contributed by this fill (net of commission), quote
    /// units.
    pub realized_delta: f64,
}

/// Per-symbol position book.
pub struct PositionBook {
    base_asset: String,
    positions: DashMap<Symbol, Position>,
}

impl PositionBook {
    /// Create a book. `base_asset` identifies commission paid in base
    /// units so it can be converted at the fill price.
    pub fn new(base_asset: impl Into<String>) -> Self {
        Self {
            base_asset: base_asset.into(),
            positions: DashMap::new(),
        }
    }

    /// Apply a fill and return the updated position plus the realized
    /// P&L delta.
    pub fn apply_fill(&self, fill: &Fill, now: f64) -> PositionUpdate {
        let mut entry = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone()));
        let pos = entry.value_mut();

        let qty = fill.quantity.to_f64();
        let price = fill.price.to_f64();
        let signed = match fill.side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };

        let old = pos.quantity.to_f64();
        let new = old + signed;
        let avg = pos.avg_entry_price.to_f64();
        let mut realized = 0.0;

        if old == 0.0 {
            // Opening a fresh position.
            pos.avg_entry_price = fill.price;
        } else if old.signum() == signed.signum() {
            // Adding to the position: re-VWAP the entry.
            let new_avg = (old.abs() * avg + qty * price) / (old.abs() + qty);
            pos.avg_entry_price = Price::from(new_avg);
        } else {
            // Reducing (possibly through zero).
            let closed = qty.min(old.abs());
            realized = closed * (price - avg) * old.signum();

            if old.signum() != new.signum() && new != 0.0 {
                // Flipped: the residual side opens at the fill price.
                pos.avg_entry_price = fill.price;
            } else if new == 0.0 {
                pos.avg_entry_price = Price::zero(Price::DEFAULT_SCALE);
            }
            // Partial reduction keeps the average.
        }

        let commission_quote = self.commission_in_quote(fill);
        realized -= commission_quote;

        pos.quantity = Quantity::from(new);
        pos.realized_pnl = Price::from(pos.realized_pnl.to_f64() + realized);
        pos.last_update = now;

        tracing::info!(
            symbol = %fill.symbol,
            old_qty = old,
            new_qty = new,
            avg_entry = pos.avg_entry_price.to_f64(),
            realized_delta = realized,
            "position updated"
        );

        PositionUpdate {
            position: pos.clone(),
            realized_delta: realized,
        }
    }

    /// Signed net quantity for a symbol (zero when flat or unknown).
    pub fn net_quantity(&self, symbol: &Symbol) -> f64 {
        self.positions
            .get(symbol)
            .map(|p| p.quantity.to_f64())
            .unwrap_or(0.0)
    }

    /// Snapshot of the position for a symbol.
    pub fn get(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.get(symbol).map(|p| p.clone())
    }

    /// Mark-to-market unrealized P&L at `mark`, quote units.
    pub fn unrealized_pnl(&self, symbol: &Symbol, mark: Price) -> f64 {
        match self.positions.get(symbol) {
            Some(pos) if !pos.quantity.is_zero() => {
                (mark.to_f64() - pos.avg_entry_price.to_f64()) * pos.quantity.to_f64()
            }
            _ => 0.0,
        }
    }

    /// Seed a position from the store at startup.
    pub fn load(&self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    /// All tracked positions.
    pub fn all(&self) -> Vec<Position> {
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    /// Commission in quote units, converting at the fill price when the
    /// fee was charged in base. Unknown fee assets are charged unconverted
    /// with a warning.
    fn commission_in_quote(&self, fill: &Fill) -> f64 {
        let commission = fill.commission.to_f64();
        if commission == 0.0 {
            return 0.0;
        }
        match fill.commission_asset.as_deref() {
            Some(asset) if asset == self.base_asset => commission * fill.price.to_f64(),
            Some(_) | None => commission,
        }
    }
}
