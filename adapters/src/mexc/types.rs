//! MEXC wire types.
//!
//! Everything numeric arrives as text and is converted to `Decimal` only when
//! a wire item is turned into a typed event. A bad field fails that one item.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use corelib::{PriceUpdate, TradeEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::MexcError;

/// `{"stream": "<channel>", "data": [...]}`
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    #[serde(default)]
    pub data: Value,
}

/// Replies to our own requests: subscription acks and `PONG`.
#[derive(Debug, Deserialize)]
pub struct ControlReply {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Outgoing request (`SUBSCRIPTION`, `PING`).
#[derive(Debug, Serialize)]
pub struct WsRequest {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Item of the deals channel.
#[derive(Debug, Clone, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
    #[serde(rename = "m", default)]
    pub is_buyer_maker: bool,
}

/// Item of the ticker channel.
#[derive(Debug, Clone, Deserialize)]
pub struct WsTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub price: String,
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
}

/// `GET /api/v3/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// `GET /api/v3/trades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrade {
    pub price: String,
    pub qty: String,
    pub time: i64,
    #[serde(default)]
    pub is_buyer_maker: bool,
}

/// `GET /api/v3/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
}

impl SymbolInfo {
    /// MEXC has reported spot status both as `TRADING`/`ENABLED` and as `"1"`.
    pub fn is_trading(&self) -> bool {
        matches!(self.status.as_str(), "TRADING" | "ENABLED" | "1")
    }
}

pub(crate) fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, MexcError> {
    Decimal::from_str(value.trim()).map_err(|_| MexcError::Decimal {
        field,
        value: value.to_string(),
    })
}

pub(crate) fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, MexcError> {
    DateTime::from_timestamp_millis(ms).ok_or(MexcError::Timestamp(ms))
}

impl WsTrade {
    pub fn into_event(self, received_at: DateTime<Utc>) -> Result<TradeEvent, MexcError> {
        let price = parse_decimal("p", &self.price)?;
        let quantity = parse_decimal("q", &self.quantity)?;
        let event_time = match self.trade_time {
            Some(ms) => millis_to_utc(ms)?,
            None => received_at,
        };

        Ok(TradeEvent {
            symbol: self.symbol,
            price,
            quantity,
            event_time,
            is_buyer_maker: self.is_buyer_maker,
        })
    }
}

impl WsTicker {
    pub fn into_event(self, received_at: DateTime<Utc>) -> Result<PriceUpdate, MexcError> {
        let price = parse_decimal("c", &self.price)?;
        let event_time = match self.event_time {
            Some(ms) => millis_to_utc(ms)?,
            None => received_at,
        };

        Ok(PriceUpdate {
            symbol: self.symbol,
            price,
            event_time,
        })
    }
}

impl TickerPrice {
    pub fn into_event(self, observed_at: DateTime<Utc>) -> Result<PriceUpdate, MexcError> {
        Ok(PriceUpdate {
            price: parse_decimal("price", &self.price)?,
            symbol: self.symbol,
            event_time: observed_at,
        })
    }
}

impl RecentTrade {
    pub fn into_event(self, symbol: &str) -> Result<TradeEvent, MexcError> {
        Ok(TradeEvent {
            symbol: symbol.to_string(),
            price: parse_decimal("price", &self.price)?,
            quantity: parse_decimal("qty", &self.qty)?,
            event_time: millis_to_utc(self.time)?,
            is_buyer_maker: self.is_buyer_maker,
        })
    }
}
