//! Alert thresholds.
//!
//! A `ThresholdConfig` can only be built through [`ThresholdConfig::new`], so
//! every value that reaches the analysis pass has already been validated.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::errors::ThresholdError;

pub const DEFAULT_WINDOW_SECS: u64 = 5;
pub const DEFAULT_MIN_VOLUME: u64 = 5_000;

/// Read-only snapshot of the thresholds used by one analysis pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdConfig {
    window_secs: u64,
    percent_change: Decimal,
    min_volume: u64,
}

impl ThresholdConfig {
    pub fn new(
        window_secs: u64,
        percent_change: Decimal,
        min_volume: u64,
    ) -> Result<Self, ThresholdError> {
        if window_secs == 0 {
            return Err(ThresholdError::NonPositiveWindow);
        }
        if window_secs > i64::MAX as u64 / 1_000 {
            return Err(ThresholdError::WindowTooLarge(window_secs));
        }
        if percent_change <= Decimal::ZERO {
            return Err(ThresholdError::NonPositiveChange(percent_change));
        }

        Ok(Self {
            window_secs,
            percent_change,
            min_volume,
        })
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Window as a signed chrono duration, for timestamp arithmetic.
    pub fn window_chrono(&self) -> chrono::Duration {
        // bounded in `new`
        chrono::Duration::seconds(self.window_secs as i64)
    }

    pub fn percent_change(&self) -> Decimal {
        self.percent_change
    }

    pub fn min_volume(&self) -> u64 {
        self.min_volume
    }

    /// Human readable percent, two decimals.
    pub fn percent_change_display(&self) -> String {
        format!("{:.2}", self.percent_change)
    }
}

/// Individually settable threshold, as named by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKey {
    /// `time`: window length in seconds.
    Window,
    /// `volume`: minimum accumulated notional.
    MinVolume,
    /// `change`: absolute percent move.
    PercentChange,
}

impl FromStr for ThresholdKey {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "time" | "window" => Ok(Self::Window),
            "volume" => Ok(Self::MinVolume),
            "change" => Ok(Self::PercentChange),
            other => Err(ThresholdError::UnknownKey(other.to_string())),
        }
    }
}

impl ThresholdConfig {
    /// Returns a copy with one value replaced, re-validated.
    pub fn with_value(&self, key: ThresholdKey, raw: &str) -> Result<Self, ThresholdError> {
        let raw = raw.trim();
        match key {
            ThresholdKey::Window => {
                let v = raw.parse::<u64>().map_err(|_| ThresholdError::Unparsable {
                    key: "time",
                    value: raw.to_string(),
                })?;
                Self::new(v, self.percent_change, self.min_volume)
            }
            ThresholdKey::MinVolume => {
                let v = raw.parse::<u64>().map_err(|_| ThresholdError::Unparsable {
                    key: "volume",
                    value: raw.to_string(),
                })?;
                Self::new(self.window_secs, self.percent_change, v)
            }
            ThresholdKey::PercentChange => {
                let v = Decimal::from_str(raw).map_err(|_| ThresholdError::Unparsable {
                    key: "change",
                    value: raw.to_string(),
                })?;
                Self::new(self.window_secs, v, self.min_volume)
            }
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            percent_change: Decimal::TWO,
            min_volume: DEFAULT_MIN_VOLUME,
        }
    }
}
