//! Individual pre-trade risk checks.

mod daily_loss;
mod max_position;
mod max_skew;
mod min_size;
mod open_orders;
mod stop_check;

pub use daily_loss::DailyLossCheck;
pub use max_position::MaxPositionCheck;
pub use max_skew::MaxSkewCheck;
pub use min_size::MinSizeCheck;
pub use open_orders::MaxOpenOrdersCheck;
pub use stop_check::StopCheck;
