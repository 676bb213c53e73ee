//! Surge detection.
//!
//! One pass walks every tracked symbol and fires an alert when, inside the
//! configured window, both hold:
//!
//! 1. accumulated trade notional `>= min_volume`
//! 2. `|percent change| >= percent_change` threshold (either direction)
//!
//! Firing consumes the alerted volume whether or not delivery worked, so a
//! surge alerts at most once until fresh volume builds up again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::{TraceId, child_span, root_span, warn_if_slow};
use corelib::{AlertEvent, NotificationSink, SettingsProvider, ThresholdConfig};
use rust_decimal::Decimal;
use tracing::{Instrument, debug, info, warn};

use crate::store::MarketStateStore;

/// Why a symbol did not fire during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoHistory,
    StalePrice,
    Suppressed,
    SuppressionUnknown,
    NoVolume,
    StaleVolume,
    BelowThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Fired { delivered: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Thresholds could not be read; nothing was evaluated.
    pub aborted: bool,
    pub evaluated: usize,
    pub fired: Vec<String>,
    pub delivery_failures: usize,
    pub skipped: Vec<(String, SkipReason)>,
}

impl PassReport {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

pub struct AnalysisEngine {
    store: MarketStateStore,
    settings: Arc<dyn SettingsProvider>,
    sink: Arc<dyn NotificationSink>,
    slow_pass: Duration,
}

impl AnalysisEngine {
    pub fn new(
        store: MarketStateStore,
        settings: Arc<dyn SettingsProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            settings,
            sink,
            slow_pass: Duration::from_secs(2),
        }
    }

    /// Warn when a pass takes longer than this.
    pub fn with_slow_pass(mut self, budget: Duration) -> Self {
        self.slow_pass = budget;
        self
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassReport {
        let trace_id = TraceId::new();
        let span = root_span("analysis_pass", &trace_id);

        warn_if_slow("analysis_pass", self.slow_pass, self.evaluate_all(now))
            .instrument(span)
            .await
    }

    async fn evaluate_all(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        let thresholds = match self.settings.current_thresholds().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "thresholds unavailable, skipping pass");
                report.aborted = true;
                return report;
            }
        };

        let window_start = now
            .checked_sub_signed(thresholds.window_chrono())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        for symbol in self.store.symbols() {
            report.evaluated += 1;
            let span = child_span("evaluate_symbol");
            span.record("symbol", symbol.as_str());
            let outcome = self
                .evaluate(&symbol, &thresholds, window_start, now)
                .instrument(span)
                .await;
            match outcome {
                Outcome::Fired { delivered } => {
                    if !delivered {
                        report.delivery_failures += 1;
                    }
                    report.fired.push(symbol);
                }
                Outcome::Skipped(reason) => report.skipped.push((symbol, reason)),
            }
        }

        debug!(
            evaluated = report.evaluated,
            fired = report.fired.len(),
            delivery_failures = report.delivery_failures,
            "analysis pass complete"
        );
        report
    }

    async fn evaluate(
        &self,
        symbol: &str,
        thresholds: &ThresholdConfig,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let Some(snapshot) = self.store.window_snapshot(symbol, window_start) else {
            return Outcome::Skipped(SkipReason::NoHistory);
        };
        if snapshot.latest.observed_at < window_start {
            return Outcome::Skipped(SkipReason::StalePrice);
        }

        match self.settings.is_suppressed(symbol, now).await {
            Ok(false) => {}
            Ok(true) => return Outcome::Skipped(SkipReason::Suppressed),
            Err(e) => {
                warn!(symbol, error = %e, "suppression lookup failed, skipping symbol");
                return Outcome::Skipped(SkipReason::SuppressionUnknown);
            }
        }

        let Some(volume) = snapshot.volume else {
            return Outcome::Skipped(SkipReason::NoVolume);
        };
        if volume.last_updated_at < window_start {
            return Outcome::Skipped(SkipReason::StaleVolume);
        }

        let change = percent_change(snapshot.reference.price, snapshot.latest.price);
        if volume.total_volume < thresholds.min_volume()
            || change.abs() < thresholds.percent_change()
        {
            return Outcome::Skipped(SkipReason::BelowThreshold);
        }

        let alert = AlertEvent {
            symbol: symbol.to_string(),
            percent_change: change,
            volume: volume.total_volume,
            fired_at: now,
        };
        // consumed before the await so trades arriving during delivery count
        // toward the next alert
        self.store.consume_volume(symbol, volume.total_volume);
        let delivery = self.sink.deliver(&alert).await;

        match delivery {
            Ok(()) => {
                info!(
                    symbol,
                    percent_change = %change,
                    volume = volume.total_volume,
                    "surge alert fired"
                );
                Outcome::Fired { delivered: true }
            }
            Err(e) => {
                warn!(symbol, error = %e, "alert delivery failed; volume cleared anyway");
                Outcome::Fired { delivered: false }
            }
        }
    }
}

/// `(current - start) / start * 100`; zero when `start <= 0` or on overflow.
pub fn percent_change(start: Decimal, current: Decimal) -> Decimal {
    if start <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    current
        .checked_sub(start)
        .and_then(|d| d.checked_div(start))
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}
