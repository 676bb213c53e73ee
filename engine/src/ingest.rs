use adapters::dispatch::EventDispatcher;
use chrono::Utc;

use crate::store::MarketStateStore;

/// Wire the store as a consumer of both event kinds.
///
/// Samples are stamped with receipt time, not exchange time, so the analysis
/// window and the pruning horizon are measured on the local clock only.
pub fn attach_store(dispatcher: &EventDispatcher, store: &MarketStateStore) {
    let trades = store.clone();
    dispatcher.on_trade(move |trade| {
        trades.record_trade(&trade.symbol, trade.price, trade.quantity, Utc::now())?;
        Ok(())
    });

    let prices = store.clone();
    dispatcher.on_price_update(move |update| {
        prices.record_price(&update.symbol, update.price, Utc::now());
        Ok(())
    });
}
