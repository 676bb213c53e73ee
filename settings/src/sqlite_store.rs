//! SQLite-backed thresholds and symbol suppressions.
//!
//! Two tables:
//!
//! - `settings(key, value)`: the three alert thresholds as text, seeded with
//!   defaults on first start (`time_interval=5`, `price_change=2.0`,
//!   `min_volume=5000`)
//! - `blacklist(symbol, expires_at_ms)`: temporarily muted symbols
//!
//! Values are validated when they are read, so a hand-edited row that breaks
//! an invariant surfaces as `SettingsError::Invalid` instead of reaching the
//! analysis pass.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use corelib::{SettingsError, SettingsProvider, ThresholdConfig, ThresholdKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

const TIME_INTERVAL: &str = "time_interval";
const PRICE_CHANGE: &str = "price_change";
const MIN_VOLUME: &str = "min_volume";

fn column(key: ThresholdKey) -> &'static str {
    match key {
        ThresholdKey::Window => TIME_INTERVAL,
        ThresholdKey::PercentChange => PRICE_CHANGE,
        ThresholdKey::MinVolume => MIN_VOLUME,
    }
}

fn backend(e: sqlx::Error) -> SettingsError {
    SettingsError::Backend(e.to_string())
}

/// An active suppression entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suppression {
    pub symbol: String,
    pub expires_at: DateTime<Utc>,
}

impl Suppression {
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, SettingsError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "settings store ready");
        Ok(store)
    }

    /// Create tables and seed default thresholds. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), SettingsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                symbol TEXT PRIMARY KEY,
                expires_at_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO settings (key, value) VALUES
                ('time_interval', '5'),
                ('price_change', '2.0'),
                ('min_volume', '5000');
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn load_thresholds(&self) -> Result<ThresholdConfig, SettingsError> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let lookup = |name: &'static str| -> Result<String, SettingsError> {
            rows.iter()
                .find(|r| r.get::<String, _>("key") == name)
                .map(|r| r.get::<String, _>("value"))
                .ok_or(SettingsError::Missing(name))
        };

        let cfg = ThresholdConfig::default()
            .with_value(ThresholdKey::Window, &lookup(TIME_INTERVAL)?)?
            .with_value(ThresholdKey::PercentChange, &lookup(PRICE_CHANGE)?)?
            .with_value(ThresholdKey::MinVolume, &lookup(MIN_VOLUME)?)?;

        Ok(cfg)
    }

    /// Persist all three thresholds in one transaction.
    pub async fn save_thresholds(&self, cfg: &ThresholdConfig) -> Result<(), SettingsError> {
        let values = [
            (TIME_INTERVAL, cfg.window_secs().to_string()),
            (PRICE_CHANGE, cfg.percent_change().to_string()),
            (MIN_VOLUME, cfg.min_volume().to_string()),
        ];

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for (key, value) in values {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;

        debug!(
            window_secs = cfg.window_secs(),
            percent_change = %cfg.percent_change(),
            min_volume = cfg.min_volume(),
            "thresholds saved"
        );
        Ok(())
    }

    /// Change one threshold from operator input. Returns the stored result.
    pub async fn set_value(
        &self,
        key: ThresholdKey,
        raw: &str,
    ) -> Result<ThresholdConfig, SettingsError> {
        let updated = self.load_thresholds().await?.with_value(key, raw)?;
        self.save_thresholds(&updated).await?;
        info!(key = column(key), value = raw, "threshold updated");
        Ok(updated)
    }

    /// Mute `symbol` until `now + duration`, replacing any existing entry.
    pub async fn add_suppression(
        &self,
        symbol: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Suppression, SettingsError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(SettingsError::InvalidSuppression("empty symbol".into()));
        }
        if duration.is_zero() {
            return Err(SettingsError::InvalidSuppression(
                "duration must be positive".into(),
            ));
        }
        let expires_at = TimeDelta::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| {
                SettingsError::InvalidSuppression(format!("duration {duration:?} is out of range"))
            })?;

        sqlx::query("INSERT OR REPLACE INTO blacklist (symbol, expires_at_ms) VALUES (?, ?)")
            .bind(&symbol)
            .bind(expires_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        info!(symbol = %symbol, expires_at = %expires_at, "symbol suppressed");
        Ok(Suppression { symbol, expires_at })
    }

    /// Returns whether an entry was removed.
    pub async fn remove_suppression(&self, symbol: &str) -> Result<bool, SettingsError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let res = sqlx::query("DELETE FROM blacklist WHERE symbol = ?")
            .bind(&symbol)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(res.rows_affected() > 0)
    }

    /// Active suppressions, soonest expiry first.
    pub async fn list_suppressions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Suppression>, SettingsError> {
        let rows = sqlx::query(
            "SELECT symbol, expires_at_ms FROM blacklist WHERE expires_at_ms > ? ORDER BY expires_at_ms",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| -> Result<Suppression, SettingsError> {
                let symbol: String = row.get("symbol");
                let ms: i64 = row.get("expires_at_ms");
                let expires_at = DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                    SettingsError::Backend(format!("bad expiry {ms} for {symbol}"))
                })?;
                Ok(Suppression { symbol, expires_at })
            })
            .collect()
    }
}

#[async_trait]
impl SettingsProvider for SqliteSettingsStore {
    async fn current_thresholds(&self) -> Result<ThresholdConfig, SettingsError> {
        self.load_thresholds().await
    }

    async fn is_suppressed(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool, SettingsError> {
        let row = sqlx::query("SELECT 1 FROM blacklist WHERE symbol = ? AND expires_at_ms > ?")
            .bind(symbol)
            .bind(now.timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, SettingsError> {
        let res = sqlx::query("DELETE FROM blacklist WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if res.rows_affected() > 0 {
            debug!(removed = res.rows_affected(), "expired suppressions purged");
        }
        Ok(res.rows_affected())
    }
}
