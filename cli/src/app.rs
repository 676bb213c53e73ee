//! Wiring for the `mexc-monitor` binary: builds the collaborators from
//! `AppConfig` and runs the operator commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adapters::dispatch::EventDispatcher;
use adapters::metrics::SourceCounters;
use adapters::mexc::{MexcPoller, MexcRestClient, MexcStreamClient, SnapshotApi, StreamConfig};
use adapters::sinks::format::format_duration;
use adapters::sinks::{LogSink, TelegramSink};
use anyhow::Context;
use chrono::Utc;
use corelib::{AlertEvent, NotificationSink, SettingsProvider, ThresholdConfig, ThresholdKey};
use engine::{
    AnalysisEngine, MarketStateStore, Pruner, attach_store, spawn_analysis_loop,
    spawn_pruning_loop,
};
use rust_decimal::Decimal;
use settings::SqliteSettingsStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::BlacklistCommand;
use crate::config::AppConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Only USDT-quoted pairs are picked up by discovery.
const DISCOVERY_QUOTE: &str = "USDT";

pub async fn open_settings(cfg: &AppConfig) -> anyhow::Result<Arc<SqliteSettingsStore>> {
    if let Some(dir) = sqlite_parent_dir(&cfg.database_url) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
    }

    let store = SqliteSettingsStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("failed to open settings database {}", cfg.database_url))?;
    Ok(Arc::new(store))
}

pub fn build_sink(cfg: &AppConfig) -> anyhow::Result<Arc<dyn NotificationSink>> {
    match &cfg.telegram_token {
        Some(token) => {
            let sink = TelegramSink::with_api_url(
                &cfg.telegram_api_url,
                token.clone(),
                cfg.telegram_chat_ids.clone(),
            )
            .context("failed to build telegram sink")?;
            info!(chats = cfg.telegram_chat_ids.len(), "alerts go to telegram");
            Ok(Arc::new(sink))
        }
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, alerts only go to the log");
            Ok(Arc::new(LogSink))
        }
    }
}

pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let settings = open_settings(&cfg).await?;
    let thresholds = settings
        .load_thresholds()
        .await
        .context("stored thresholds are unusable")?;
    log_thresholds(&thresholds);

    if cfg.retention.as_secs() <= thresholds.window_secs() {
        warn!(
            retention_secs = cfg.retention.as_secs(),
            window_secs = thresholds.window_secs(),
            "retention does not exceed the analysis window; reference prices will be pruned early"
        );
    }

    let sink = build_sink(&cfg)?;
    let shutdown = CancellationToken::new();

    let dispatcher = Arc::new(EventDispatcher::new(SourceCounters::default()));
    let store = MarketStateStore::new();
    attach_store(&dispatcher, &store);

    let rest = Arc::new(MexcRestClient::new(&cfg.rest_url).context("failed to build REST client")?);
    let symbols = resolve_symbols(&cfg, rest.as_ref()).await;
    info!(count = symbols.len(), "tracking symbols");

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let stream = if cfg.stream_enabled {
        let mut stream_cfg = StreamConfig::new(&cfg.ws_url, symbols.clone());
        stream_cfg.reconnect_backoff = cfg.reconnect_backoff;

        let client = Arc::new(MexcStreamClient::new(
            stream_cfg,
            Arc::clone(&dispatcher),
            &shutdown,
        ));
        let connecting = Arc::clone(&client);
        tasks.push((
            "stream-connect",
            tokio::spawn(async move {
                match connecting.connect_with_retry().await {
                    Ok(c) => info!(url = %c.url, at = %c.connected_at, "market stream up"),
                    Err(e) => warn!(error = %e, "market stream not started"),
                }
            }),
        ));
        Some(client)
    } else {
        None
    };

    if cfg.poll_enabled {
        let mut poller = MexcPoller::new(
            Arc::clone(&rest),
            symbols,
            Arc::clone(&dispatcher),
            cfg.poll_interval,
        );
        if let Some(client) = &stream {
            poller = poller.with_stream_gate(client.watch_state());
        }
        let poller = Arc::new(poller);
        let cancel = shutdown.clone();
        tasks.push((
            "poller",
            tokio::spawn(async move { poller.run(cancel).await }),
        ));
    }

    let settings_dyn: Arc<dyn SettingsProvider> = settings;
    let analysis = Arc::new(
        AnalysisEngine::new(store.clone(), Arc::clone(&settings_dyn), sink)
            .with_slow_pass(cfg.analysis_interval),
    );
    tasks.push((
        "analysis",
        spawn_analysis_loop(analysis, cfg.analysis_interval, shutdown.clone()),
    ));

    let pruner = Arc::new(Pruner::new(store.clone(), settings_dyn, cfg.retention));
    tasks.push((
        "pruning",
        spawn_pruning_loop(pruner, cfg.prune_interval, shutdown.clone()),
    ));

    info!("monitor running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    shutdown.cancel();
    for (name, handle) in tasks {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = ?e, "task ended abnormally"),
            Err(_) => warn!(task = name, "task did not stop in time"),
        }
    }
    if let Some(stream) = stream {
        stream.disconnect().await;
    }

    log_counters(dispatcher.counters(), store.len());
    Ok(())
}

/// Configured symbols, or the exchange's active USDT pairs when discovery is
/// on and succeeds.
async fn resolve_symbols<A: SnapshotApi>(cfg: &AppConfig, api: &A) -> Vec<String> {
    if !cfg.discover_symbols {
        return cfg.symbols.clone();
    }

    match api.active_symbols().await {
        Ok(all) => {
            let picked = discovered_pairs(all);
            if picked.is_empty() {
                warn!("discovery returned no {DISCOVERY_QUOTE} pairs, using configured symbols");
                cfg.symbols.clone()
            } else {
                picked
            }
        }
        Err(e) => {
            warn!(error = %e, "symbol discovery failed, using configured symbols");
            cfg.symbols.clone()
        }
    }
}

fn discovered_pairs(all: Vec<String>) -> Vec<String> {
    let mut picked: Vec<String> = all
        .into_iter()
        .map(|s| s.to_ascii_uppercase())
        .filter(|s| s.ends_with(DISCOVERY_QUOTE) && s.len() > DISCOVERY_QUOTE.len())
        .collect();
    picked.sort();
    picked.dedup();
    picked
}

pub async fn status(cfg: &AppConfig) -> anyhow::Result<()> {
    let settings = open_settings(cfg).await?;
    let thresholds = settings.load_thresholds().await?;

    println!("Thresholds");
    println!("  time    {}s", thresholds.window_secs());
    println!("  change  {}%", thresholds.percent_change_display());
    println!("  volume  {}", thresholds.min_volume());

    print_suppressions(&settings).await
}

pub async fn set_threshold(cfg: &AppConfig, key: ThresholdKey, value: &str) -> anyhow::Result<()> {
    let settings = open_settings(cfg).await?;
    let updated = settings.set_value(key, value).await?;
    println!(
        "saved: time {}s, change {}%, volume {}",
        updated.window_secs(),
        updated.percent_change_display(),
        updated.min_volume()
    );
    Ok(())
}

pub async fn blacklist(cfg: &AppConfig, cmd: BlacklistCommand) -> anyhow::Result<()> {
    let settings = open_settings(cfg).await?;
    let now = Utc::now();

    match cmd {
        BlacklistCommand::Add { symbol, seconds } => {
            let entry = settings
                .add_suppression(&symbol, Duration::from_secs(seconds), now)
                .await?;
            println!(
                "{} muted for {}",
                entry.symbol,
                format_duration(entry.remaining(now))
            );
        }
        BlacklistCommand::Remove { symbol } => {
            if settings.remove_suppression(&symbol).await? {
                println!("{} unmuted", symbol.trim().to_ascii_uppercase());
            } else {
                println!("{} was not muted", symbol.trim().to_ascii_uppercase());
            }
        }
        BlacklistCommand::List => print_suppressions(&settings).await?,
    }
    Ok(())
}

pub async fn test_alert(cfg: &AppConfig) -> anyhow::Result<()> {
    let sink = build_sink(cfg)?;
    let alert = AlertEvent {
        symbol: "TEST/USDT".into(),
        percent_change: Decimal::new(25, 1),
        volume: 15_000,
        fired_at: Utc::now(),
    };

    sink.deliver(&alert)
        .await
        .context("test alert was not delivered")?;
    println!("test alert delivered");
    Ok(())
}

async fn print_suppressions(settings: &SqliteSettingsStore) -> anyhow::Result<()> {
    let now = Utc::now();
    let active = settings.list_suppressions(now).await?;

    if active.is_empty() {
        println!("No muted symbols");
        return Ok(());
    }

    println!("Muted symbols");
    for entry in active {
        println!("  {:<16} {}", entry.symbol, format_duration(entry.remaining(now)));
    }
    Ok(())
}

fn log_thresholds(cfg: &ThresholdConfig) {
    info!(
        window_secs = cfg.window_secs(),
        percent_change = %cfg.percent_change(),
        min_volume = cfg.min_volume(),
        "thresholds loaded"
    );
}

fn log_counters(counters: &SourceCounters, symbols: usize) {
    info!(
        frames = SourceCounters::get(&counters.frames),
        dispatched = SourceCounters::get(&counters.dispatched_events),
        decode_errors = SourceCounters::get(&counters.decode_errors),
        dropped = SourceCounters::get(&counters.dropped_events),
        handler_failures = SourceCounters::get(&counters.handler_failures),
        reconnects = SourceCounters::get(&counters.reconnects),
        poll_failures = SourceCounters::get(&counters.poll_failures),
        symbols,
        "monitor stopped"
    );
}

/// Directory holding a file-backed SQLite database, if the URL names one.
fn sqlite_parent_dir(url: &str) -> Option<std::path::PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }

    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
