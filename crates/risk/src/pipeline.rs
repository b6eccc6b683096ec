//! Risk check pipeline.
//!
//! Every order submission is evaluated against all registered
//! [`RiskCheck`]s. Evaluation does not short-circuit: a rejection carries
//! every violated check so the operator sees the full picture, not just the
//! first failure.

use thiserror::Error;

use xmaker_core::types::{Order, Side};

/// Context available to risk checks on each order evaluation.
///
/// Plain values only; the OMS assembles this from its own state so the risk
/// crate stays free of storage dependencies.
pub struct RiskContext {
    /// Current signed net position for the order's symbol, base units.
    pub position_qty: f64,
    /// Realized P&L accumulated since the last daily reset, quote units.
    pub daily_realized_pnl: f64,
    /// Count of non-terminal orders.
    pub open_order_count: u32,
}

/// A single violated risk rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskReject {
    /// The emergency stop is engaged.
    #[error("emergency stop engaged")]
    EmergencyStop,
    /// Order size below the minimum quote size.
    #[error("order size {size} below minimum {min}")]
    MinSize { size: f64, min: f64 },
    /// Projected position would exceed the maximum.
    #[error("projected position {projected} exceeds limit {limit}")]
    MaxPosition { projected: f64, limit: f64 },
    /// Projected directional exposure would exceed the skew limit.
    #[error("projected skew {projected} exceeds limit {limit}")]
    MaxSkew { projected: f64, limit: f64 },
    /// Daily realized loss limit breached.
    #[error("daily loss {pnl} breaches limit {limit}")]
    DailyLoss { pnl: f64, limit: f64 },
    /// Too many open orders.
    #[error("open orders {count} at limit {limit}")]
    MaxOpenOrders { count: u32, limit: u32 },
}

/// A rejected submission with every violated rule.
#[derive(Debug, Clone, Error)]
#[error("order rejected by risk: {}", violation_summary(.violations))]
pub struct RiskRejection {
    /// All violated checks, in pipeline order.
    pub violations: Vec<RiskReject>,
}

fn violation_summary(violations: &[RiskReject]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Trait for individual pre-trade risk checks.
pub trait RiskCheck: Send + Sync {
    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Evaluate the order against this rule.
    fn check(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskReject>;
}

/// Pipeline that evaluates every registered check.
pub struct RiskPipeline {
    checks: Vec<Box<dyn RiskCheck>>,
}

impl RiskPipeline {
    /// Create a new, empty risk pipeline.
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Append a risk check to the pipeline.
    pub fn add_check(&mut self, check: impl RiskCheck + 'static) {
        self.checks.push(Box::new(check));
    }

    /// Evaluate all checks. Returns `Err` with every violation collected.
    pub fn check_order(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskRejection> {
        let mut violations = Vec::new();
        for check in &self.checks {
            if let Err(reject) = check.check(order, ctx) {
                tracing::warn!(
                    check = check.name(),
                    order_id = %order.order_id,
                    violation = %reject,
                    "risk check failed"
                );
                violations.push(reject);
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RiskRejection { violations })
        }
    }

    /// Number of registered checks.
    pub fn check_count(&self) -> usize {
        self.checks.len()
    }
}

impl Default for RiskPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed projected position after the order fully fills.
pub(crate) fn projected_position(order: &Order, current: f64) -> f64 {
    let qty = order.quantity.to_f64();
    match order.side {
        Side::Buy => current + qty,
        Side::Sell => current - qty,
    }
}
