//! Shared test collaborators.
#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corelib::{
    AlertEvent, DeliveryError, NotificationSink, SettingsError, SettingsProvider, ThresholdConfig,
};
use parking_lot::Mutex;

/// In-memory settings with switchable failures.
pub struct MockSettings {
    pub thresholds: Mutex<ThresholdConfig>,
    pub suppressed_until: Mutex<HashMap<String, DateTime<Utc>>>,
    pub fail_thresholds: Mutex<bool>,
    pub fail_suppression: Mutex<bool>,
    pub purge_calls: Mutex<u32>,
}

impl MockSettings {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds: Mutex::new(thresholds),
            suppressed_until: Mutex::new(HashMap::new()),
            fail_thresholds: Mutex::new(false),
            fail_suppression: Mutex::new(false),
            purge_calls: Mutex::new(0),
        }
    }

    pub fn suppress(&self, symbol: &str, until: DateTime<Utc>) {
        self.suppressed_until.lock().insert(symbol.to_string(), until);
    }
}

#[async_trait]
impl SettingsProvider for MockSettings {
    async fn current_thresholds(&self) -> Result<ThresholdConfig, SettingsError> {
        if *self.fail_thresholds.lock() {
            return Err(SettingsError::Backend("database is locked".into()));
        }
        Ok(self.thresholds.lock().clone())
    }

    async fn is_suppressed(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool, SettingsError> {
        if *self.fail_suppression.lock() {
            return Err(SettingsError::Backend("database is locked".into()));
        }
        Ok(self
            .suppressed_until
            .lock()
            .get(symbol)
            .is_some_and(|until| *until > now))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, SettingsError> {
        *self.purge_calls.lock() += 1;
        let mut map = self.suppressed_until.lock();
        let before = map.len();
        map.retain(|_, until| *until > now);
        Ok((before - map.len()) as u64)
    }
}

/// Records every alert; can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<AlertEvent>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        self.alerts.lock().push(alert.clone());
        if *self.fail.lock() {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        Ok(())
    }
}
