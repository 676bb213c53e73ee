use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use corelib::{SettingsError, SettingsProvider, ThresholdError, ThresholdKey};
use rust_decimal_macros::dec;
use settings::SqliteSettingsStore;
use sqlx::sqlite::SqlitePoolOptions;

async fn setup_store() -> SqliteSettingsStore {
    // one connection: every connection to :memory: is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let store = SqliteSettingsStore::from_pool(pool);
    store.migrate().await.unwrap();
    store
}

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_718_000_000, 0).unwrap()
}

#[tokio::test]
async fn seeds_default_thresholds() {
    let store = setup_store().await;
    let cfg = store.current_thresholds().await.unwrap();

    assert_eq!(cfg.window_secs(), 5);
    assert_eq!(cfg.percent_change(), dec!(2.0));
    assert_eq!(cfg.min_volume(), 5_000);
}

#[tokio::test]
async fn migrate_twice_keeps_user_values() {
    let store = setup_store().await;
    store.set_value(ThresholdKey::MinVolume, "12000").await.unwrap();

    store.migrate().await.unwrap();

    assert_eq!(store.load_thresholds().await.unwrap().min_volume(), 12_000);
}

#[tokio::test]
async fn set_value_updates_one_threshold() {
    let store = setup_store().await;

    let cfg = store.set_value(ThresholdKey::PercentChange, "3.5").await.unwrap();
    assert_eq!(cfg.percent_change(), dec!(3.5));

    let cfg = store.set_value(ThresholdKey::Window, "30").await.unwrap();
    assert_eq!(cfg.window_secs(), 30);
    assert_eq!(cfg.percent_change(), dec!(3.5));

    let reloaded = store.load_thresholds().await.unwrap();
    assert_eq!(reloaded, cfg);
}

#[tokio::test]
async fn invalid_value_is_rejected_and_not_stored() {
    let store = setup_store().await;

    let err = store.set_value(ThresholdKey::Window, "0").await.unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Invalid(ThresholdError::NonPositiveWindow)
    ));

    let err = store.set_value(ThresholdKey::MinVolume, "lots").await.unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Invalid(ThresholdError::Unparsable { key: "volume", .. })
    ));

    assert_eq!(store.load_thresholds().await.unwrap().window_secs(), 5);
}

#[tokio::test]
async fn corrupted_row_surfaces_as_invalid() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteSettingsStore::from_pool(pool.clone());
    store.migrate().await.unwrap();

    sqlx::query("UPDATE settings SET value = '-1' WHERE key = 'price_change'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(matches!(
        store.current_thresholds().await,
        Err(SettingsError::Invalid(ThresholdError::NonPositiveChange(_)))
    ));

    sqlx::query("DELETE FROM settings WHERE key = 'min_volume'")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE settings SET value = '2.0' WHERE key = 'price_change'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(matches!(
        store.current_thresholds().await,
        Err(SettingsError::Missing("min_volume"))
    ));
}

#[tokio::test]
async fn suppression_lifecycle() {
    let store = setup_store().await;

    let entry = store
        .add_suppression("btcusdt", Duration::from_secs(3600), now())
        .await
        .unwrap();
    assert_eq!(entry.symbol, "BTCUSDT");
    assert_eq!(entry.remaining(now()), Duration::from_secs(3600));

    assert!(store.is_suppressed("BTCUSDT", now()).await.unwrap());
    assert!(!store.is_suppressed("ETHUSDT", now()).await.unwrap());

    // expired exactly at the boundary
    let expiry = now() + TimeDelta::seconds(3600);
    assert!(!store.is_suppressed("BTCUSDT", expiry).await.unwrap());

    assert!(store.remove_suppression("BTCUSDT").await.unwrap());
    assert!(!store.remove_suppression("BTCUSDT").await.unwrap());
    assert!(!store.is_suppressed("BTCUSDT", now()).await.unwrap());
}

#[tokio::test]
async fn re_adding_replaces_expiry() {
    let store = setup_store().await;
    store
        .add_suppression("SOLUSDT", Duration::from_secs(60), now())
        .await
        .unwrap();
    store
        .add_suppression("SOLUSDT", Duration::from_secs(600), now())
        .await
        .unwrap();

    let active = store.list_suppressions(now()).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].expires_at, now() + TimeDelta::seconds(600));
}

#[tokio::test]
async fn list_returns_active_entries_by_expiry() {
    let store = setup_store().await;
    store.add_suppression("LATE", Duration::from_secs(900), now()).await.unwrap();
    store.add_suppression("SOON", Duration::from_secs(60), now()).await.unwrap();
    store.add_suppression("GONE", Duration::from_secs(1), now()).await.unwrap();

    let later = now() + TimeDelta::seconds(10);
    let active = store.list_suppressions(later).await.unwrap();

    let symbols: Vec<_> = active.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["SOON", "LATE"]);
}

#[tokio::test]
async fn purge_removes_only_expired() {
    let store = setup_store().await;
    store.add_suppression("A", Duration::from_secs(10), now()).await.unwrap();
    store.add_suppression("B", Duration::from_secs(20), now()).await.unwrap();
    store.add_suppression("C", Duration::from_secs(300), now()).await.unwrap();

    let removed = store
        .purge_expired(now() + TimeDelta::seconds(20))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let removed = store
        .purge_expired(now() + TimeDelta::seconds(20))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert!(store.is_suppressed("C", now()).await.unwrap());
}

#[tokio::test]
async fn rejects_bad_suppressions() {
    let store = setup_store().await;

    assert!(matches!(
        store.add_suppression("BTCUSDT", Duration::ZERO, now()).await,
        Err(SettingsError::InvalidSuppression(_))
    ));
    assert!(matches!(
        store.add_suppression("  ", Duration::from_secs(5), now()).await,
        Err(SettingsError::InvalidSuppression(_))
    ));
    assert!(matches!(
        store.add_suppression("BTCUSDT", Duration::MAX, now()).await,
        Err(SettingsError::InvalidSuppression(_))
    ));
}
