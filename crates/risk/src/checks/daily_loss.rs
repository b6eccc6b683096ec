//! Daily loss limit check.

use xmaker_core::types::Order;

use crate::pipeline::{RiskCheck, RiskContext, RiskReject};

/// Rejects all new orders once the daily realized loss reaches the limit.
///
/// The accumulator itself (and its 24-hour reset) lives in the OMS; this
/// check only judges the value it is handed.
pub struct DailyLossCheck {
    /// Maximum daily realized loss, quote units (positive number).
    pub max_daily_loss: f64,
}

impl RiskCheck for DailyLossCheck {
    fn name(&self) -> &str {
        "daily_loss"
    }

    fn check(&self, _order: &Order, ctx: &RiskContext) -> Result<(), RiskReject> {
        if ctx.daily_realized_pnl <= -self.max_daily_loss {
            Err(RiskReject::DailyLoss {
                pnl: ctx.daily_realized_pnl,
                limit: self.max_daily_loss,
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
    fn test_profitable_day_passes() {
        let check = DailyLossCheck {
            max_daily_loss: 1000.0,
        };
        let mut ctx = neutral_ctx();
        ctx.daily_realized_pnl = 50.0;
        assert!(check.check(&make_order(Side::Buy, 10.0), &ctx).is_ok());
    }

    #[test]
    fn test_loss_inside_limit_passes() {
        let check = DailyLossCheck {
            max_daily_loss: 1000.0,
        };
        let mut ctx = neutral_ctx();
        ctx.daily_realized_pnl = -999.0;
        assert!(check.check(&make_order(Side::Buy, 10.0), &ctx).is_ok());
    }

    #[test]
    fn test_loss_at_limit_rejects() {
        let check = DailyLossCheck {
            max_daily_loss: 1000.0,
        };
        let mut ctx = neutral_ctx();
        ctx.daily_realized_pnl = -1000.0;
        let err = check.check(&make_order(Side::Buy, 10.0), &ctx).unwrap_err();
        assert!(matches!(err, RiskReject::DailyLoss { .. }));
    }
}
