//! Typed publish/subscribe for market events.
//!
//! Both the stream client and the REST poller push into the same
//! `EventDispatcher`, so consumers register once and see events from either
//! path.
//!
//! Handlers are untrusted: each call is wrapped in `catch_unwind` and its
//! `Result` inspected, so one bad handler does not prevent the others from
//! running and never takes down the read loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use corelib::{MarketEvent, PriceUpdate, TradeEvent};
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::metrics::SourceCounters;

pub type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static>;
pub type TradeHandler = Handler<TradeEvent>;
pub type PriceHandler = Handler<PriceUpdate>;

/// Result of dispatching a single event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventDispatcher {
    trade_handlers: RwLock<Vec<TradeHandler>>,
    price_handlers: RwLock<Vec<PriceHandler>>,
    counters: SourceCounters,
}

impl EventDispatcher {
    pub fn new(counters: SourceCounters) -> Self {
        Self {
            counters,
            ..Default::default()
        }
    }

    pub fn counters(&self) -> &SourceCounters {
        &self.counters
    }

    /// Register a trade consumer. Consumers run in registration order.
    pub fn on_trade<F>(&self, handler: F)
    where
        F: Fn(&TradeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.trade_handlers.write().push(Arc::new(handler));
    }

    /// Register a price-update consumer. Consumers run in registration order.
    pub fn on_price_update<F>(&self, handler: F)
    where
        F: Fn(&PriceUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.price_handlers.write().push(Arc::new(handler));
    }

    pub fn handler_count(&self) -> (usize, usize) {
        (
            self.trade_handlers.read().len(),
            self.price_handlers.read().len(),
        )
    }

    pub fn dispatch(&self, event: &MarketEvent) -> DispatchOutcome {
        // snapshot so handlers may register further handlers without deadlocking
        let outcome = match event {
            MarketEvent::Trade(trade) => {
                let handlers = self.trade_handlers.read().clone();
                invoke_all(&handlers, trade, &trade.symbol, "trade")
            }
            MarketEvent::PriceUpdate(update) => {
                let handlers = self.price_handlers.read().clone();
                invoke_all(&handlers, update, &update.symbol, "price_update")
            }
        };

        SourceCounters::incr(&self.counters.dispatched_events);
        SourceCounters::add(&self.counters.handler_failures, outcome.failed as u64);
        outcome
    }

    pub fn dispatch_all(&self, events: &[MarketEvent]) -> DispatchOutcome {
        events.iter().fold(DispatchOutcome::default(), |acc, ev| {
            let o = self.dispatch(ev);
            DispatchOutcome {
                invoked: acc.invoked + o.invoked,
                failed: acc.failed + o.failed,
            }
        })
    }
}

fn invoke_all<E>(
    handlers: &[Handler<E>],
    event: &E,
    symbol: &str,
    kind: &'static str,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    for (idx, handler) in handlers.iter().enumerate() {
        outcome.invoked += 1;
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                outcome.failed += 1;
                warn!(error = %e, handler = idx, kind, symbol, "event handler failed");
            }
            Err(_) => {
                outcome.failed += 1;
                error!(handler = idx, kind, symbol, "event handler panicked");
            }
        }
    }

    outcome
}
