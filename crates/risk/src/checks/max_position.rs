//! Maximum position size check.

use xmaker_core::types::Order;

use crate::pipeline::{projected_position, RiskCheck, RiskContext, RiskReject};

/// Rejects orders whose full fill would push the absolute position past
/// the configured maximum.
pub struct MaxPositionCheck {
    /// Maximum absolute position, base units.
    pub max_position_size: f64,
}

impl RiskCheck for MaxPositionCheck {
    fn name(&self) -> &str {
        "max_position"
    }

    fn check(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskReject> {
        let projected = projected_position(order, ctx.position_qty);
        if projected.abs() > self.max_position_size {
            Err(RiskReject::MaxPosition {
                projected,
                limit: self.max_position_size,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests_support::{make_order, neutral_ctx};
    use xmaker_core::types::Side;

    #[test]
    fn test_within_limit_passes() {
        let check = MaxPositionCheck {
            max_position_size: 100.0,
        };
        assert!(check.check(&make_order(Side::Buy, 100.0), &neutral_ctx()).is_ok());
    }

    #[test]
    fn test_projected_breach_rejects() {
        let check = MaxPositionCheck {
            max_position_size: 100.0,
        };
        let mut ctx = neutral_ctx();
        ctx.position_qty = 50.0;
        let err = check.check(&make_order(Side::Buy, 60.0), &ctx).unwrap_err();
        assert!(matches!(err, RiskReject::MaxPosition { projected, .. } if projected == 110.0));
    }

    #[test]
    fn test_short_breach_rejects() {
        let check = MaxPositionCheck {
            max_position_size: 100.0,
        };
        let mut ctx = neutral_ctx();
        ctx.position_qty = -50.0;
        assert!(check.check(&make_order(Side::Sell, 60.0), &ctx).is_err());
        // Selling into a long reduces exposure and passes.
        ctx.position_qty = 50.0;
        assert!(check.check(&make_order(Side::Sell, 60.0), &ctx).is_ok());
    }
}
