//! Open order count check.

use xmaker_core::types::Order;

use crate::pipeline::{RiskCheck, RiskContext, RiskReject};

/// Rejects submissions once the count of non-terminal orders is at the
/// configured maximum.
pub struct MaxOpenOrdersCheck {
    /// Maximum number of open (non-terminal) orders.
    pub max_open_orders: u32,
}

impl RiskCheck for MaxOpenOrdersCheck {
    fn name(&self) -> &str {
        "max_open_orders"
    }

    fn check(&self, _order: &Order, ctx: &RiskContext) -> Result<(), RiskReject> {
        if ctx.open_order_count >= self.max_open_orders {
            Err(RiskReject::MaxOpenOrders {
                count: ctx.open_order_count,
                limit: self.max_open_orders,
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
    fn test_below_limit_passes() {
        let check = MaxOpenOrdersCheck { max_open_orders: 50 };
        let mut ctx = neutral_ctx();
        ctx.open_order_count = 49;
        assert!(check.check(&make_order(Side::Buy, 10.0), &ctx).is_ok());
    }

    #[test]
    fn test_at_limit_rejects() {
        let check = MaxOpenOrdersCheck { max_open_orders: 50 };
        let mut ctx = neutral_ctx();
        ctx.open_order_count = 50;
        let err = check.check(&make_order(Side::Buy, 10.0), &ctx).unwrap_err();
        assert!(matches!(
            err,
            RiskReject::MaxOpenOrders { count: 50, limit: 50 }
        ));
    }
}
