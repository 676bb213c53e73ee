use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Emitted by the analysis pass when both thresholds are crossed.
///
/// Handed to a `NotificationSink` and then dropped; nothing keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub symbol: String,

    /// Signed move over the window, in percent.
    pub percent_change: Decimal,

    /// Accumulated notional in quote-currency units.
    pub volume: u64,

    pub fired_at: DateTime<Utc>,
}
