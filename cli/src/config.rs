use std::time::Duration;

use adapters::mexc::{DEFAULT_REST_URL, DEFAULT_WS_URL, default_symbols};
use adapters::sinks::DEFAULT_TELEGRAM_API;
use engine::DEFAULT_RETENTION;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{0} is required when {1} is set")]
    Requires(&'static str, &'static str),

    #[error("both the stream and the poller are disabled; nothing would feed the monitor")]
    NoDataSource,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Exchange websocket endpoint (`MEXC_WS_URL`).
    pub ws_url: String,

    /// Exchange REST base (`MEXC_REST_URL`). Used by the poller and for
    /// symbol discovery.
    pub rest_url: String,

    /// Tracked symbols (`MONITOR_SYMBOLS`, comma separated, upper-cased).
    pub symbols: Vec<String>,

    /// Replace `symbols` with every actively trading USDT pair reported by
    /// the exchange at startup (`MONITOR_DISCOVER_SYMBOLS`). Falls back to
    /// `symbols` when discovery fails.
    pub discover_symbols: bool,

    // =========================
    // Data sources
    // =========================
    /// Consume the websocket stream (`MONITOR_STREAM_ENABLED`).
    pub stream_enabled: bool,

    /// Run the REST poller (`MONITOR_POLL_ENABLED`).
    ///
    /// With the stream also on, the poller is a fallback: it keeps sampling
    /// prices but only fetches trades while the stream is not connected.
    pub poll_enabled: bool,

    pub poll_interval: Duration,

    /// Fixed wait between reconnect attempts.
    pub reconnect_backoff: Duration,

    // =========================
    // Timers
    // =========================
    /// Cadence of the analysis pass (`MONITOR_ANALYSIS_INTERVAL_SECS`).
    pub analysis_interval: Duration,

    /// Cadence of the prune pass (`MONITOR_PRUNE_INTERVAL_SECS`).
    pub prune_interval: Duration,

    /// How long market state is kept (`MONITOR_RETENTION_SECS`).
    ///
    /// Must stay longer than the analysis window stored in the settings
    /// database, otherwise reference prices disappear before they are used.
    pub retention: Duration,

    /// SQLite connection string for thresholds and the blacklist.
    pub database_url: String,

    // =========================
    // Notifications
    // =========================
    /// Bot token (`TELEGRAM_BOT_TOKEN`). Without it alerts only go to the log.
    pub telegram_token: Option<String>,

    /// Chats receiving alerts (`TELEGRAM_CHAT_IDS`, comma separated).
    pub telegram_chat_ids: Vec<i64>,

    pub telegram_api_url: String,

    /// JSON logs (`APP_ENV=production`).
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let symbols = match get("MONITOR_SYMBOLS") {
            Some(raw) => parse_symbols(&raw),
            None => default_symbols(),
        };
        if symbols.is_empty() {
            return Err(ConfigError::Invalid {
                var: "MONITOR_SYMBOLS",
                value: get("MONITOR_SYMBOLS").unwrap_or_default(),
                reason: "no symbols",
            });
        }

        let telegram_token = get("TELEGRAM_BOT_TOKEN");
        let telegram_chat_ids = match get("TELEGRAM_CHAT_IDS") {
            Some(raw) => parse_chat_ids(&raw)?,
            None => Vec::new(),
        };
        if telegram_token.is_some() && telegram_chat_ids.is_empty() {
            return Err(ConfigError::Requires("TELEGRAM_CHAT_IDS", "TELEGRAM_BOT_TOKEN"));
        }

        let cfg = Self {
            ws_url: get("MEXC_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            rest_url: get("MEXC_REST_URL").unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
            symbols,
            discover_symbols: flag(&get, "MONITOR_DISCOVER_SYMBOLS", false)?,
            stream_enabled: flag(&get, "MONITOR_STREAM_ENABLED", true)?,
            poll_enabled: flag(&get, "MONITOR_POLL_ENABLED", true)?,
            poll_interval: secs(&get, "MONITOR_POLL_INTERVAL_SECS", 5)?,
            reconnect_backoff: secs(&get, "MONITOR_RECONNECT_BACKOFF_SECS", 3)?,
            analysis_interval: secs(&get, "MONITOR_ANALYSIS_INTERVAL_SECS", 5)?,
            prune_interval: secs(&get, "MONITOR_PRUNE_INTERVAL_SECS", 300)?,
            retention: secs(&get, "MONITOR_RETENTION_SECS", DEFAULT_RETENTION.as_secs())?,
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/monitor.db".to_string()),
            telegram_token,
            telegram_chat_ids,
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
            json_logs: get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
        };

        if !cfg.stream_enabled && !cfg.poll_enabled {
            return Err(ConfigError::NoDataSource);
        }

        Ok(cfg)
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.dedup();
    out
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| ConfigError::Invalid {
                var: "TELEGRAM_CHAT_IDS",
                value: s.to_string(),
                reason: "not an integer chat id",
            })
        })
        .collect()
}

fn flag<G>(get: &G, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(var) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected true or false",
        }),
    }
}

fn secs<G>(get: &G, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(var) else {
        return Ok(Duration::from_secs(default));
    };
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected a positive number of seconds",
        }),
        Ok(n) => Ok(Duration::from_secs(n)),
    }
}
