//! REST polling fallback.
//!
//! Each round fetches all ticker prices plus the recent trades of every
//! tracked symbol, turns them into the same `MarketEvent`s the stream emits
//! and pushes them through the shared dispatcher.
//!
//! Trades are deduplicated with a per-symbol watermark: the newest trade time
//! seen plus the trades already forwarded at exactly that millisecond (MEXC
//! returns no trade ids). The first round for a symbol only seeds the
//! watermark so history that predates the process is never counted as fresh
//! volume.
//!
//! When gated on the stream's connection state, trade requests are skipped
//! while the stream is `Connected` and the watermarks are dropped, so each
//! trade reaches the store through one path only. Prices keep flowing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corelib::MarketEvent;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SnapshotApi;
use super::types::RecentTrade;
use super::ws::ConnectionState;
use crate::dispatch::EventDispatcher;
use crate::metrics::SourceCounters;

pub const DEFAULT_TRADE_LIMIT: u16 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub prices: usize,
    pub trades: usize,
    pub failed_requests: usize,
    /// Trade requests skipped because the stream was live.
    pub trades_gated: bool,
}

/// Identity of a trade within one millisecond.
type TradeKey = (String, String, bool);

fn trade_key(t: &RecentTrade) -> TradeKey {
    (t.price.clone(), t.qty.clone(), t.is_buyer_maker)
}

#[derive(Debug, Default)]
struct Watermark {
    time: i64,
    // trades already forwarded at `time`, with multiplicity
    at_mark: HashMap<TradeKey, usize>,
}

pub struct MexcPoller<A> {
    api: A,
    symbols: Vec<String>,
    dispatcher: Arc<EventDispatcher>,
    every: Duration,
    trade_limit: u16,
    watermarks: Mutex<HashMap<String, Watermark>>,
    stream_state: Option<watch::Receiver<ConnectionState>>,
}

impl<A: SnapshotApi> MexcPoller<A> {
    pub fn new(
        api: A,
        symbols: Vec<String>,
        dispatcher: Arc<EventDispatcher>,
        every: Duration,
    ) -> Self {
        Self {
            api,
            symbols,
            dispatcher,
            every,
            trade_limit: DEFAULT_TRADE_LIMIT,
            watermarks: Mutex::new(HashMap::new()),
            stream_state: None,
        }
    }

    /// Only poll trades while the stream is not connected.
    pub fn with_stream_gate(mut self, state: watch::Receiver<ConnectionState>) -> Self {
        self.stream_state = Some(state);
        self
    }

    fn stream_live(&self) -> bool {
        self.stream_state
            .as_ref()
            .is_some_and(|rx| *rx.borrow() == ConnectionState::Connected)
    }

    pub fn with_trade_limit(mut self, limit: u16) -> Self {
        self.trade_limit = limit;
        self
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            symbols = self.symbols.len(),
            every_ms = self.every.as_millis() as u64,
            "mexc poller started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // a round in flight is abandoned on shutdown
                    let report = tokio::select! {
                        _ = cancel.cancelled() => break,
                        report = self.poll_once(Utc::now()) => report,
                    };
                    debug!(
                        prices = report.prices,
                        trades = report.trades,
                        failed = report.failed_requests,
                        gated = report.trades_gated,
                        "poll round complete"
                    );
                }
            }
        }

        info!("mexc poller stopped");
    }

    /// One polling round. Never fails as a whole; request failures are
    /// counted and the affected symbol is skipped.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> PollReport {
        let counters = self.dispatcher.counters();
        let mut report = PollReport::default();
        let tracked: HashSet<&str> = self.symbols.iter().map(String::as_str).collect();

        match self.api.all_tickers().await {
            Ok(tickers) => {
                let mut events = Vec::new();
                for ticker in tickers.into_iter().filter(|t| tracked.contains(t.symbol.as_str())) {
                    match ticker.into_event(now) {
                        Ok(update) => events.push(MarketEvent::PriceUpdate(update)),
                        Err(e) => {
                            SourceCounters::incr(&counters.dropped_events);
                            debug!(error = %e, "dropping ticker snapshot");
                        }
                    }
                }
                report.prices = events.len();
                self.dispatcher.dispatch_all(&events);
            }
            Err(e) => {
                report.failed_requests += 1;
                SourceCounters::incr(&counters.poll_failures);
                warn!(error = %e, "ticker snapshot failed");
            }
        }

        if self.stream_live() {
            self.watermarks.lock().clear();
            report.trades_gated = true;
            return report;
        }

        for symbol in &self.symbols {
            match self.api.recent_trades(symbol, self.trade_limit).await {
                Ok(trades) => {
                    let events = self.fresh_trades(symbol, trades);
                    report.trades += events.len();
                    self.dispatcher.dispatch_all(&events);
                }
                Err(e) => {
                    report.failed_requests += 1;
                    SourceCounters::incr(&counters.poll_failures);
                    warn!(error = %e, symbol = %symbol, "recent trades request failed");
                }
            }
        }

        report
    }

    fn fresh_trades(
        &self,
        symbol: &str,
        mut trades: Vec<RecentTrade>,
    ) -> Vec<MarketEvent> {
        trades.sort_by_key(|t| t.time);
        let newest = match trades.last() {
            Some(t) => t.time,
            None => return Vec::new(),
        };
        let newest_keys = keys_at(&trades, newest);

        let mut marks = self.watermarks.lock();
        let Some(mark) = marks.get_mut(symbol) else {
            marks.insert(
                symbol.to_string(),
                Watermark {
                    time: newest,
                    at_mark: newest_keys,
                },
            );
            debug!(symbol, watermark = newest, "seeded trade watermark");
            return Vec::new();
        };

        let mark_time = mark.time;
        let mut seen_at_mark = mark.at_mark.clone();
        let fresh: Vec<RecentTrade> = trades
            .into_iter()
            .filter(|t| match t.time.cmp(&mark_time) {
                Ordering::Less => false,
                Ordering::Greater => true,
                Ordering::Equal => match seen_at_mark.get_mut(&trade_key(t)) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        false
                    }
                    _ => true,
                },
            })
            .collect();

        if newest > mark_time {
            *mark = Watermark {
                time: newest,
                at_mark: newest_keys,
            };
        } else if newest == mark_time {
            for (key, n) in newest_keys {
                let seen = mark.at_mark.entry(key).or_default();
                *seen = (*seen).max(n);
            }
        }
        drop(marks);

        let counters = self.dispatcher.counters();
        fresh
            .into_iter()
            .filter_map(|t| match t.into_event(symbol) {
                Ok(trade) => Some(MarketEvent::Trade(trade)),
                Err(e) => {
                    SourceCounters::incr(&counters.dropped_events);
                    debug!(error = %e, symbol, "dropping trade snapshot");
                    None
                }
            })
            .collect()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

fn keys_at(trades: &[RecentTrade], time: i64) -> HashMap<TradeKey, usize> {
    let mut keys = HashMap::new();
    for t in trades.iter().filter(|t| t.time == time) {
        *keys.entry(trade_key(t)).or_default() += 1;
    }
    keys
}
