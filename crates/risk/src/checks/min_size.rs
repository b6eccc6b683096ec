//! Minimum order size check.

use xmaker_core::types::Order;

use crate::pipeline::{RiskCheck, RiskContext, RiskReject};

/// Rejects orders below the venue's minimum quote size.
pub struct MinSizeCheck {
    /// Minimum order size in base units.
    pub min_quote_size: f64,
}

impl RiskCheck for MinSizeCheck {
    fn name(&self) -> &str {
        "min_size"
    }

    fn check(&self, order: &Order, _ctx: &RiskContext) -> Result<(), RiskReject> {
        let size = order.quantity.to_f64();
        if size < self.min_quote_size {
            Err(RiskReject::MinSize {
                size,
                min: self.min_quote_size,
            })
        } else {
            Ok(())
        }
    }
}
