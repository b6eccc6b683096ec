//! Inventory skew gauge.
//!
//! Tracks the USD-marked value of the base and quote assets and reduces the
//! imbalance to a single normalized number:
//!
//! `gamma = (V_quote − V_base) / (V_quote + V_base)`, clamped to
//! `[-gamma_max, +gamma_max]`.
//!
//! Positive gamma means the inventory is quote-asset-heavy and the engine
//! should lean into buying the base asset.

use std::collections::HashMap;

use parking_lot::Mutex;

/// One asset's marked balance.
#[derive(Debug, Clone, Copy)]
struct AssetMark {
    quantity: f64,
    value_usd: f64,
    updated_at: f64,
}

/// Computes the inventory skew from destination-venue balances.
pub struct SkewGauge {
    base_asset: String,
    quote_asset: String,
    gamma_max: f64,
    target_ratio: f64,
    ratio_tolerance: f64,
    marks: Mutex<HashMap<String, AssetMark>>,
}

impl SkewGauge {
    /// Create a gauge for a `base`/`quote` pair.
    pub fn new(
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        gamma_max: f64,
        target_ratio: f64,
        ratio_tolerance: f64,
    ) -> Self {
        Self {
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            gamma_max,
            target_ratio,
            ratio_tolerance,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Record a balance update with its USD mark price.
    pub fn update_balance(&self, asset: &str, quantity: f64, price_usd: f64, now: f64) {
        let mut marks = self.marks.lock();
        marks.insert(
            asset.to_string(),
            AssetMark {
                quantity,
                value_usd: quantity * price_usd,
                updated_at: now,
            },
        );
        tracing::debug!(asset, quantity, value_usd = quantity * price_usd, "balance marked");
    }

    /// Current quote:base value ratio, if both sides are known and the base
    /// side is non-zero.
    pub fn ratio(&self) -> Option<f64> {
        let marks = self.marks.lock();
        let base = marks.get(&self.base_asset)?;
        let quote = marks.get(&self.quote_asset)?;
        if base.value_usd == 0.0 {
            return None;
        }
        Some(quote.value_usd / base.value_usd)
    }

    /// Normalized inventory imbalance, clamped to `[-gamma_max, gamma_max]`.
    ///
    /// Returns `0.0` (neutral) while either side is unknown.
    pub fn gamma(&self) -> f64 {
        let marks = self.marks.lock();
        let (Some(base), Some(quote)) = (
            marks.get(&self.base_asset),
            marks.get(&self.quote_asset),
        ) else {
            return 0.0;
        };
        let total = base.value_usd + quote.value_usd;
        if total <= 0.0 {
            return 0.0;
        }
        let gamma = (quote.value_usd - base.value_usd) / total;
        gamma.clamp(-self.gamma_max, self.gamma_max)
    }

    /// Whether the current ratio sits within tolerance of the target.
    /// `None` while either side is unknown.
    pub fn within_tolerance(&self) -> Option<bool> {
        let ratio = self.ratio()?;
        let deviation = (ratio - self.target_ratio).abs() / self.target_ratio;
        Some(deviation <= self.ratio_tolerance)
    }

    /// Quantity held of one asset, for status reporting.
    pub fn quantity(&self, asset: &str) -> Option<f64> {
        self.marks.lock().get(asset).map(|m| m.quantity)
    }

    /// Age of the oldest mark in seconds, for staleness monitoring.
    pub fn oldest_mark_age(&self, now: f64) -> Option<f64> {
        let marks = self.marks.lock();
        marks
            .values()
            .map(|m| now - m.updated_at)
            .fold(None, |acc, age| Some(acc.map_or(age, |a: f64| a.max(age))))
    }
}
