//! Emergency stop check.

use std::sync::Arc;

use xmaker_core::types::Order;

use crate::pipeline::{RiskCheck, RiskContext, RiskReject};
use crate::stop::EmergencyStop;

/// Rejects every order while the emergency stop is engaged.
pub struct StopCheck {
    /// The shared stop flag.
    pub stop: Arc<EmergencyStop>,
}

impl RiskCheck for StopCheck {
    fn name(&self) -> &str {
        "emergency_stop"
    }

    fn check(&self, _order: &Order, _ctx: &RiskContext) -> Result<(), RiskReject> {
        if self.stop.is_engaged() {
            Err(RiskReject::EmergencyStop)
        } else {
            Ok(())
        }
    }
}
