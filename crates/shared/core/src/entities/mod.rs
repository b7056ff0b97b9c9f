//! Trading enums carried inside message payloads

mod confidence;
mod direction;
mod timeframe;
mod trade_status;

pub use confidence::Confidence;
pub use direction::Direction;
pub use timeframe::Timeframe;
pub use trade_status::TradeStatus;
