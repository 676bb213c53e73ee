pub mod dispatch;
pub mod metrics;
pub mod mexc;
pub mod sinks;
