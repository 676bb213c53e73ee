use async_trait::async_trait;
use corelib::{AlertEvent, DeliveryError, NotificationSink};
use tracing::info;

/// Sink used when no chat transport is configured: alerts only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        info!(
            target: "alerts",
            symbol = %alert.symbol,
            percent_change = %alert.percent_change,
            volume = alert.volume,
            fired_at = %alert.fired_at,
            "surge alert"
        );
        Ok(())
    }
}
