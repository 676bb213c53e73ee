pub mod alert;
pub mod market;
pub mod thresholds;

pub use alert::AlertEvent;
pub use market::{MarketEvent, PriceUpdate, TradeEvent};
pub use thresholds::{ThresholdConfig, ThresholdKey};
