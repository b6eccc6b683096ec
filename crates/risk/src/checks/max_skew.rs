//! Directional exposure (skew) check.

use xmaker_core::types::Order;

use crate::pipeline::{projected_position, RiskCheck, RiskContext, RiskReject};

/// Rejects orders whose projected directional exposure exceeds the skew
/// limit. Tighter than the position limit: it bounds how lopsided the
/// inventory may become before quoting pauses on the heavy side.
pub struct MaxSkewCheck {
    /// Maximum absolute directional exposure, base units.
    pub max_skew: f64,
}

impl RiskCheck for MaxSkewCheck {
    fn name(&self) -> &str {
        "max_skew"
    }

    fn check(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskReject> {
        let projected = projected_position(order, ctx.position_qty);
        if projected.abs() > self.max_skew {
            Err(RiskReject::MaxSkew {
                projected,
                limit: self.max_skew,
            })
        } else {
            Ok(())
        }
    }
}
