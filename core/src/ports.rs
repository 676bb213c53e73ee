//! Collaborator seams used by the engine.
//!
//! The engine never knows where thresholds are stored or how alerts travel;
//! it only calls through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{DeliveryError, SettingsError};
use crate::models::{AlertEvent, ThresholdConfig};

/// Delivers alerts somewhere. The engine never retries a failed delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError>;
}

/// Threshold and suppression lookups.
///
/// Called once per analysis pass for thresholds and once per symbol for
/// suppression, so implementations must be cheap.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn current_thresholds(&self) -> Result<ThresholdConfig, SettingsError>;

    async fn is_suppressed(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool, SettingsError>;

    /// Drop expired suppression entries. Returns how many were removed.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, SettingsError> {
        Ok(0)
    }
}
