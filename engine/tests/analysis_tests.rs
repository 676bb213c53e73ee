use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use corelib::ThresholdConfig;
use engine::{AnalysisEngine, MarketStateStore, Pruner, SkipReason};
use rust_decimal_macros::dec;

mod mocks;
use mocks::{MockSettings, RecordingSink};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_718_000_000, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

struct Setup {
    store: MarketStateStore,
    settings: Arc<MockSettings>,
    sink: Arc<RecordingSink>,
    engine: AnalysisEngine,
}

/// window 5s, threshold 2.0%, min volume 5000
fn setup() -> Setup {
    let store = MarketStateStore::new();
    let settings = Arc::new(MockSettings::new(
        ThresholdConfig::new(5, dec!(2.0), 5_000).unwrap(),
    ));
    let sink = Arc::new(RecordingSink::default());
    let engine = AnalysisEngine::new(store.clone(), settings.clone(), sink.clone());

    Setup {
        store,
        settings,
        sink,
        engine,
    }
}

/// Price moves `from -> to` across the window with `volume` traded at t4.
fn surge(store: &MarketStateStore, symbol: &str, from: rust_decimal::Decimal, to: rust_decimal::Decimal, volume: u64) {
    store.record_price(symbol, from, at(0));
    store.record_price(symbol, to, at(5));
    store
        .record_trade(symbol, dec!(1), volume.into(), at(4))
        .unwrap();
}

#[tokio::test]
async fn rising_price_with_volume_fires() {
    let s = setup();
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = s.engine.run_pass(at(5)).await;

    assert_eq!(report.fired, vec!["BTCUSDT".to_string()]);
    let alerts = s.sink.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].symbol, "BTCUSDT");
    assert_eq!(alerts[0].percent_change, dec!(3.0));
    assert_eq!(alerts[0].volume, 6_000);
    assert_eq!(alerts[0].fired_at, at(5));
}

#[tokio::test]
async fn insufficient_volume_does_not_fire() {
    let s = setup();
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 4_000);

    let report = s.engine.run_pass(at(5)).await;

    assert!(report.fired.is_empty());
    assert_eq!(report.skipped_for(SkipReason::BelowThreshold), 1);
    assert!(s.sink.alerts.lock().is_empty());
    // untouched state
    assert_eq!(s.store.current_volume("BTCUSDT").unwrap().total_volume, 4_000);
}

#[tokio::test]
async fn thresholds_are_inclusive_and_direction_agnostic() {
    let s = setup();
    surge(&s.store, "ETHUSDT", dec!(100), dec!(98), 5_000);

    let report = s.engine.run_pass(at(5)).await;

    assert_eq!(report.fired, vec!["ETHUSDT".to_string()]);
    assert_eq!(s.sink.alerts.lock()[0].percent_change, dec!(-2));
}

#[tokio::test]
async fn small_move_does_not_fire() {
    let s = setup();
    surge(&s.store, "ETHUSDT", dec!(100), dec!(101.99), 50_000);

    let report = s.engine.run_pass(at(5)).await;
    assert!(report.fired.is_empty());
}

#[tokio::test]
async fn firing_clears_volume_so_next_pass_is_quiet() {
    let s = setup();
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    s.engine.run_pass(at(5)).await;
    assert!(s.store.current_volume("BTCUSDT").is_none());

    let second = s.engine.run_pass(at(6)).await;
    assert!(second.fired.is_empty());
    assert_eq!(second.skipped_for(SkipReason::NoVolume), 1);
    assert_eq!(s.sink.alerts.lock().len(), 1);
}

#[tokio::test]
async fn delivery_failure_still_clears_volume() {
    let s = setup();
    *s.sink.fail.lock() = true;
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);
    surge(&s.store, "SOLUSDT", dec!(100), dec!(110), 9_000);

    let report = s.engine.run_pass(at(5)).await;

    assert_eq!(report.fired.len(), 2);
    assert_eq!(report.delivery_failures, 2);
    assert!(s.store.current_volume("BTCUSDT").is_none());
    assert!(s.store.current_volume("SOLUSDT").is_none());
}

#[tokio::test]
async fn suppressed_symbol_is_silent_until_expiry() {
    let s = setup();
    s.settings.suppress("BTCUSDT", at(30));
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = s.engine.run_pass(at(5)).await;
    assert!(report.fired.is_empty());
    assert_eq!(report.skipped_for(SkipReason::Suppressed), 1);
    // suppression does not consume the volume
    assert_eq!(s.store.current_volume("BTCUSDT").unwrap().total_volume, 6_000);

    // after expiry, a fresh surge alerts normally
    s.store.record_price("BTCUSDT", dec!(100), at(30));
    s.store.record_price("BTCUSDT", dec!(104), at(35));
    s.store.record_trade("BTCUSDT", dec!(1), dec!(7000), at(34)).unwrap();

    let report = s.engine.run_pass(at(35)).await;
    assert_eq!(report.fired, vec!["BTCUSDT".to_string()]);
}

#[tokio::test]
async fn suppression_lookup_failure_skips_symbol() {
    let s = setup();
    *s.settings.fail_suppression.lock() = true;
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = s.engine.run_pass(at(5)).await;
    assert!(report.fired.is_empty());
    assert_eq!(report.skipped_for(SkipReason::SuppressionUnknown), 1);
}

#[tokio::test]
async fn threshold_failure_skips_whole_pass() {
    let s = setup();
    *s.settings.fail_thresholds.lock() = true;
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = s.engine.run_pass(at(5)).await;
    assert!(report.aborted);
    assert_eq!(report.evaluated, 0);
    assert_eq!(s.store.current_volume("BTCUSDT").unwrap().total_volume, 6_000);
}

#[tokio::test]
async fn stale_prices_are_skipped() {
    let s = setup();
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = s.engine.run_pass(at(20)).await;
    assert_eq!(report.skipped_for(SkipReason::StalePrice), 1);
}

#[tokio::test]
async fn stale_volume_is_skipped() {
    let s = setup();
    s.store.record_trade("BTCUSDT", dec!(1), dec!(9000), at(0)).unwrap();
    s.store.record_price("BTCUSDT", dec!(100), at(10));
    s.store.record_price("BTCUSDT", dec!(110), at(14));

    let report = s.engine.run_pass(at(14)).await;
    assert_eq!(report.skipped_for(SkipReason::StaleVolume), 1);
}

#[tokio::test]
async fn short_history_uses_oldest_sample_as_reference() {
    let s = setup();
    // history only covers 2s of a 5s window
    s.store.record_price("BTCUSDT", dec!(100), at(3));
    s.store.record_price("BTCUSDT", dec!(102), at(5));
    s.store.record_trade("BTCUSDT", dec!(1), dec!(5000), at(5)).unwrap();

    let report = s.engine.run_pass(at(5)).await;
    assert_eq!(report.fired.len(), 1);
    assert_eq!(s.sink.alerts.lock()[0].percent_change, dec!(2));
}

#[tokio::test]
async fn pruned_accumulator_means_no_alert() {
    let s = setup();
    let now = at(660);
    // last trade 11 minutes before `now`
    s.store.record_trade("BTCUSDT", dec!(1), dec!(9000), at(0)).unwrap();
    s.store.record_price("BTCUSDT", dec!(100), at(655));
    s.store.record_price("BTCUSDT", dec!(110), at(660));

    let pruner = Pruner::new(s.store.clone(), s.settings.clone(), Duration::from_secs(600));
    let pruned = pruner.run_pass(now).await;
    assert_eq!(pruned.store.accumulators_removed, 1);
    assert_eq!(*s.settings.purge_calls.lock(), 1);

    let report = s.engine.run_pass(now).await;
    assert!(report.fired.is_empty());
    assert_eq!(report.skipped_for(SkipReason::NoVolume), 1);
}

#[tokio::test]
async fn prune_pass_purges_expired_suppressions() {
    let s = setup();
    s.settings.suppress("OLD", at(10));
    s.settings.suppress("LIVE", at(1_000));

    let pruner = Pruner::new(s.store.clone(), s.settings.clone(), Duration::from_secs(600));
    let report = pruner.run_pass(at(100)).await;

    assert_eq!(report.purged_suppressions, Some(1));
    assert!(s.settings.suppressed_until.lock().contains_key("LIVE"));
}

#[tokio::test]
async fn one_alert_per_symbol_per_pass() {
    let s = setup();
    surge(&s.store, "BTCUSDT", dec!(100), dec!(103), 6_000);
    surge(&s.store, "ETHUSDT", dec!(100), dec!(100.5), 6_000);
    surge(&s.store, "SOLUSDT", dec!(100), dec!(90), 20_000);

    let report = s.engine.run_pass(at(5)).await;

    assert_eq!(report.evaluated, 3);
    assert_eq!(
        report.fired,
        vec!["BTCUSDT".to_string(), "SOLUSDT".to_string()]
    );
    assert_eq!(s.sink.alerts.lock().len(), 2);
}

/// Records a trade into the store while the alert is being delivered.
struct TradingSink {
    store: MarketStateStore,
    delivered: parking_lot::Mutex<u32>,
}

#[async_trait::async_trait]
impl corelib::NotificationSink for TradingSink {
    async fn deliver(&self, _alert: &corelib::AlertEvent) -> Result<(), corelib::DeliveryError> {
        self.store
            .record_trade("BTCUSDT", dec!(1), dec!(3000), at(5))
            .unwrap();
        *self.delivered.lock() += 1;
        Ok(())
    }
}

#[tokio::test]
async fn volume_arriving_during_delivery_survives_the_alert() {
    let store = MarketStateStore::new();
    let settings = Arc::new(MockSettings::new(
        ThresholdConfig::new(5, dec!(2.0), 5_000).unwrap(),
    ));
    let sink = Arc::new(TradingSink {
        store: store.clone(),
        delivered: parking_lot::Mutex::new(0),
    });
    let engine = AnalysisEngine::new(store.clone(), settings, sink.clone());
    surge(&store, "BTCUSDT", dec!(100), dec!(103), 6_000);

    let report = engine.run_pass(at(5)).await;

    assert_eq!(report.fired, vec!["BTCUSDT".to_string()]);
    assert_eq!(*sink.delivered.lock(), 1);
    let left = store.current_volume("BTCUSDT").unwrap();
    assert_eq!(left.total_volume, 3_000);
}
