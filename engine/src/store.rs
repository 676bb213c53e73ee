//! In-memory market state shared by ingestion, analysis and pruning.
//!
//! Per symbol the store keeps:
//! - an ordered price history (`PriceSample`s in receipt order)
//! - an optional volume accumulator (sum of trade notional since the last
//!   alert or prune)
//!
//! One store-wide `RwLock` guards the map. Every public method takes the lock
//! exactly once, so a reader never observes half of a write and multi-step
//! reads (`window_snapshot`) are consistent. The map itself never leaves this
//! module.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, instrument};

use crate::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSample {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAccumulator {
    pub symbol: String,
    /// Whole currency units.
    pub total_volume: u64,
    pub last_updated_at: DateTime<Utc>,
}

/// Everything the analysis pass needs for one symbol, read in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub latest: PriceSample,
    /// Newest sample at or before the window start, or the oldest retained
    /// sample when history is shorter than the window.
    pub reference: PriceSample,
    pub volume: Option<VolumeAccumulator>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub samples_removed: usize,
    pub accumulators_removed: usize,
    pub symbols_removed: usize,
}

#[derive(Debug, Default)]
struct SymbolState {
    prices: VecDeque<PriceSample>,
    volume: Option<VolumeAccumulator>,
}

impl SymbolState {
    fn at_or_before(&self, target: DateTime<Utc>) -> Option<PriceSample> {
        self.prices
            .iter()
            .rev()
            .find(|s| s.observed_at <= target)
            .or_else(|| self.prices.front())
            .copied()
    }

    fn is_empty(&self) -> bool {
        self.prices.is_empty() && self.volume.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketStateStore {
    inner: Arc<RwLock<HashMap<String, SymbolState>>>,
}

impl MarketStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_price(&self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        let mut map = self.inner.write();
        map.entry(symbol.to_string())
            .or_default()
            .prices
            .push_back(PriceSample {
                price,
                observed_at: at,
            });
    }

    /// Add `price * quantity` (truncated to whole units) to the symbol's
    /// accumulator. Returns the new total.
    pub fn record_trade(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let overflow = || StoreError::Overflow {
            symbol: symbol.to_string(),
        };

        let notional = price.checked_mul(quantity).ok_or_else(overflow)?;
        if notional < Decimal::ZERO {
            return Err(StoreError::NegativeNotional {
                symbol: symbol.to_string(),
                notional,
            });
        }
        let units = notional.trunc().to_u64().ok_or_else(overflow)?;

        let mut map = self.inner.write();
        let state = map.entry(symbol.to_string()).or_default();
        let acc = state.volume.get_or_insert_with(|| VolumeAccumulator {
            symbol: symbol.to_string(),
            total_volume: 0,
            last_updated_at: at,
        });

        acc.total_volume = acc.total_volume.checked_add(units).ok_or_else(overflow)?;
        acc.last_updated_at = at;
        Ok(acc.total_volume)
    }

    pub fn latest_price(&self, symbol: &str) -> Option<PriceSample> {
        self.inner.read().get(symbol)?.prices.back().copied()
    }

    /// Newest sample with `observed_at <= target`, falling back to the oldest
    /// sample. `None` only when the symbol has no price history.
    pub fn price_at_or_before(&self, symbol: &str, target: DateTime<Utc>) -> Option<PriceSample> {
        self.inner.read().get(symbol)?.at_or_before(target)
    }

    /// Number of retained price samples for `symbol`.
    pub fn history_len(&self, symbol: &str) -> usize {
        self.inner.read().get(symbol).map_or(0, |s| s.prices.len())
    }

    pub fn current_volume(&self, symbol: &str) -> Option<VolumeAccumulator> {
        self.inner.read().get(symbol)?.volume.clone()
    }

    pub fn reset_volume(&self, symbol: &str) {
        if let Some(state) = self.inner.write().get_mut(symbol) {
            state.volume = None;
        }
    }

    /// Subtract an alerted `amount` from the accumulator in one critical
    /// section. Volume recorded after the snapshot that produced `amount`
    /// stays; the accumulator is removed once nothing is left. Returns the
    /// remaining total.
    pub fn consume_volume(&self, symbol: &str, amount: u64) -> u64 {
        let mut map = self.inner.write();
        let Some(state) = map.get_mut(symbol) else {
            return 0;
        };
        let remaining = match &mut state.volume {
            Some(acc) if acc.total_volume > amount => {
                acc.total_volume -= amount;
                acc.total_volume
            }
            _ => 0,
        };
        if remaining == 0 {
            state.volume = None;
        }
        remaining
    }

    pub fn window_snapshot(&self, symbol: &str, window_start: DateTime<Utc>) -> Option<WindowSnapshot> {
        let map = self.inner.read();
        let state = map.get(symbol)?;

        Some(WindowSnapshot {
            latest: *state.prices.back()?,
            reference: state.at_or_before(window_start)?,
            volume: state.volume.clone(),
        })
    }

    /// Drop samples and accumulators strictly older than `now - horizon`.
    /// Symbols left with no state are removed entirely.
    #[instrument(skip(self), level = "debug")]
    pub fn prune_older_than(&self, horizon: Duration, now: DateTime<Utc>) -> PruneStats {
        let mut stats = PruneStats::default();
        let Some(cutoff) = cutoff(now, horizon) else {
            return stats;
        };

        let mut map = self.inner.write();
        for state in map.values_mut() {
            let before = state.prices.len();
            state.prices.retain(|s| s.observed_at >= cutoff);
            stats.samples_removed += before - state.prices.len();

            if state
                .volume
                .as_ref()
                .is_some_and(|v| v.last_updated_at < cutoff)
            {
                state.volume = None;
                stats.accumulators_removed += 1;
            }
        }

        let before = map.len();
        map.retain(|_, state| !state.is_empty());
        stats.symbols_removed = before - map.len();

        debug!(
            samples = stats.samples_removed,
            accumulators = stats.accumulators_removed,
            symbols = stats.symbols_removed,
            "store pruned"
        );
        stats
    }

    /// Read-only walk over every symbol under one read lock.
    pub fn for_each_symbol<F>(&self, mut visit: F)
    where
        F: FnMut(&str, Option<&PriceSample>, Option<&VolumeAccumulator>),
    {
        let map = self.inner.read();
        for (symbol, state) in map.iter() {
            visit(symbol, state.prices.back(), state.volume.as_ref());
        }
    }

    /// Tracked symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.read().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// `None` when the horizon reaches past the representable range, in which
/// case nothing is old enough to prune.
fn cutoff(now: DateTime<Utc>, horizon: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(horizon).ok()?;
    now.checked_sub_signed(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_718_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn trade_notional_is_truncated_and_accumulated() {
        let store = MarketStateStore::new();

        assert_eq!(store.record_trade("BTCUSDT", dec!(100.5), dec!(10), t(0)), Ok(1005));
        assert_eq!(store.record_trade("BTCUSDT", dec!(0.99), dec!(1), t(1)), Ok(1005));
        assert_eq!(store.record_trade("BTCUSDT", dec!(3), dec!(1.7), t(2)), Ok(1010));

        let acc = store.current_volume("BTCUSDT").unwrap();
        assert_eq!(acc.total_volume, 1010);
        assert_eq!(acc.last_updated_at, t(2));
        assert_eq!(acc.symbol, "BTCUSDT");
    }

    #[test]
    fn negative_notional_is_rejected_without_side_effects() {
        let store = MarketStateStore::new();
        store.record_trade("ETHUSDT", dec!(10), dec!(1), t(0)).unwrap();

        let err = store.record_trade("ETHUSDT", dec!(-10), dec!(1), t(1)).unwrap_err();
        assert!(matches!(err, StoreError::NegativeNotional { .. }));
        assert_eq!(store.current_volume("ETHUSDT").unwrap().total_volume, 10);
        assert_eq!(store.current_volume("ETHUSDT").unwrap().last_updated_at, t(0));
    }

    #[test]
    fn overflowing_notional_is_rejected() {
        let store = MarketStateStore::new();
        let err = store
            .record_trade("X", Decimal::MAX, dec!(2), t(0))
            .unwrap_err();
        assert_eq!(err, StoreError::Overflow { symbol: "X".into() });
        assert!(store.current_volume("X").is_none());
    }

    #[test]
    fn at_or_before_picks_newest_qualifying_sample() {
        let store = MarketStateStore::new();
        for (s, p) in [(0, dec!(100)), (2, dec!(101)), (4, dec!(102)), (6, dec!(103))] {
            store.record_price("BTCUSDT", p, t(s));
        }

        assert_eq!(store.price_at_or_before("BTCUSDT", t(4)).unwrap().price, dec!(102));
        assert_eq!(store.price_at_or_before("BTCUSDT", t(5)).unwrap().price, dec!(102));
        assert_eq!(store.price_at_or_before("BTCUSDT", t(100)).unwrap().price, dec!(103));
    }

    #[test]
    fn at_or_before_falls_back_to_oldest() {
        let store = MarketStateStore::new();
        store.record_price("BTCUSDT", dec!(100), t(10));
        store.record_price("BTCUSDT", dec!(105), t(12));
        store.record_price("ETHUSDT", dec!(1), t(0));

        let s = store.price_at_or_before("BTCUSDT", t(5)).unwrap();
        assert_eq!(s.price, dec!(100));
        assert_eq!(s.observed_at, t(10));
        assert!(store.price_at_or_before("SOLUSDT", t(5)).is_none());
    }

    #[test]
    fn reset_removes_only_the_accumulator() {
        let store = MarketStateStore::new();
        store.record_price("BTCUSDT", dec!(100), t(0));
        store.record_trade("BTCUSDT", dec!(100), dec!(60), t(0)).unwrap();

        store.reset_volume("BTCUSDT");
        store.reset_volume("UNKNOWN");

        assert!(store.current_volume("BTCUSDT").is_none());
        assert_eq!(store.latest_price("BTCUSDT").unwrap().price, dec!(100));
    }

    #[test]
    fn consume_keeps_volume_recorded_after_the_snapshot() {
        let store = MarketStateStore::new();
        store.record_trade("BTCUSDT", dec!(1), dec!(6000), t(0)).unwrap();
        let seen = store.current_volume("BTCUSDT").unwrap().total_volume;
        store.record_trade("BTCUSDT", dec!(1), dec!(250), t(1)).unwrap();

        assert_eq!(store.consume_volume("BTCUSDT", seen), 250);
        let acc = store.current_volume("BTCUSDT").unwrap();
        assert_eq!(acc.total_volume, 250);
        assert_eq!(acc.last_updated_at, t(1));

        assert_eq!(store.consume_volume("BTCUSDT", 250), 0);
        assert!(store.current_volume("BTCUSDT").is_none());
        assert_eq!(store.consume_volume("UNKNOWN", 10), 0);
    }

    #[test]
    fn snapshot_reads_everything_at_once() {
        let store = MarketStateStore::new();
        store.record_price("BTCUSDT", dec!(100), t(0));
        store.record_price("BTCUSDT", dec!(103), t(5));
        store.record_trade("BTCUSDT", dec!(100), dec!(60), t(4)).unwrap();

        let snap = store.window_snapshot("BTCUSDT", t(0)).unwrap();
        assert_eq!(snap.latest.price, dec!(103));
        assert_eq!(snap.reference.price, dec!(100));
        assert_eq!(snap.volume.unwrap().total_volume, 6000);

        assert!(store.window_snapshot("NOPE", t(0)).is_none());
    }

    #[test]
    fn snapshot_without_prices_is_none() {
        let store = MarketStateStore::new();
        store.record_trade("BTCUSDT", dec!(1), dec!(1), t(0)).unwrap();
        assert!(store.window_snapshot("BTCUSDT", t(0)).is_none());
    }

    #[test]
    fn prune_removes_strictly_older_entries() {
        let store = MarketStateStore::new();
        let now = t(1_000);
        store.record_price("BTCUSDT", dec!(1), t(300)); // 700s old
        store.record_price("BTCUSDT", dec!(2), t(400)); // exactly at horizon
        store.record_price("BTCUSDT", dec!(3), t(900));
        store.record_trade("BTCUSDT", dec!(1), dec!(10), t(340)).unwrap(); // 11 min old

        let stats = store.prune_older_than(Duration::from_secs(600), now);

        assert_eq!(stats.samples_removed, 1);
        assert_eq!(stats.accumulators_removed, 1);
        assert_eq!(store.price_at_or_before("BTCUSDT", t(0)).unwrap().price, dec!(2));
        assert!(store.current_volume("BTCUSDT").is_none());
    }

    #[test]
    fn prune_drops_empty_symbols() {
        let store = MarketStateStore::new();
        store.record_price("OLD", dec!(1), t(0));
        store.record_price("NEW", dec!(1), t(990));

        let stats = store.prune_older_than(Duration::from_secs(600), t(1_000));
        assert_eq!(stats.symbols_removed, 1);
        assert_eq!(store.symbols(), vec!["NEW".to_string()]);
    }

    #[test]
    fn huge_horizon_prunes_nothing() {
        let store = MarketStateStore::new();
        store.record_price("BTCUSDT", dec!(1), t(0));
        let stats = store.prune_older_than(Duration::MAX, t(10));
        assert_eq!(stats, PruneStats::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn for_each_symbol_sees_latest_state() {
        let store = MarketStateStore::new();
        store.record_price("A", dec!(1), t(0));
        store.record_price("A", dec!(2), t(1));
        store.record_trade("B", dec!(1), dec!(5), t(0)).unwrap();

        let mut seen = Vec::new();
        store.for_each_symbol(|s, latest, vol| {
            seen.push((s.to_string(), latest.map(|p| p.price), vol.map(|v| v.total_volume)));
        });
        seen.sort();

        assert_eq!(
            seen,
            vec![
                ("A".to_string(), Some(dec!(2)), None),
                ("B".to_string(), None, Some(5)),
            ]
        );
    }
}
