use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A single executed trade, normalized from either the stream or the REST poller.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub event_time: DateTime<Utc>,
    pub is_buyer_maker: bool,
}

/// Last traded price for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Decimal,
    pub event_time: DateTime<Utc>,
}

/// Closed set of events the data source hands to its consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Trade(TradeEvent),
    PriceUpdate(PriceUpdate),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::PriceUpdate(p) => &p.symbol,
        }
    }
}
