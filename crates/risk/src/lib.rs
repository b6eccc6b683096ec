//! # xmaker-risk
//!
//! Pre-trade risk gating. Every order submission passes through a
//! [`RiskPipeline`] of [`RiskCheck`] implementations before it may touch
//! the store or the outbox. Unlike a short-circuit pipeline, all checks run
//! on every order so a rejection reports the complete list of violations.

pub mod checks;
pub mod pipeline;
pub mod stop;

pub use checks::{
    DailyLossCheck, MaxOpenOrdersCheck, MaxPositionCheck, MaxSkewCheck, MinSizeCheck,
    StopCheck,
};
pub use pipeline::{RiskCheck, RiskContext, RiskPipeline, RiskReject, RiskRejection};
pub use stop::EmergencyStop;
