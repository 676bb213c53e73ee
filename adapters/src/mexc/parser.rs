//! MEXC stream frame parser.
//!
//! Market frames are wrapped in a channel envelope:
//!
//! ```jsonc
//! {
//!   "stream": "spot@public.deals.v3.api",
//!   "data": [ { "s": "BTCUSDT", "p": "64000.1", "q": "0.02", "T": 1718000000000, "m": false } ]
//! }
//! ```
//!
//! The channel id selects the item shape: deals become `MarketEvent::Trade`,
//! tickers (`{ "s", "c", "E" }`) become `MarketEvent::PriceUpdate`. Channels we
//! do not know are returned as `Frame::Ignored` so newer server feeds never
//! break the reader. Replies to our own requests (`{"id":..,"code":0,"msg":..}`)
//! come back as `Frame::Control`.
//!
//! Failure granularity:
//! - invalid JSON or a non-array `data` fails the whole frame (`Err`)
//! - an item that does not decode, or carries an unparsable number, is counted
//!   in `ParsedFrame::dropped` and the remaining items are still returned

use chrono::{DateTime, Utc};
use corelib::MarketEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::errors::MexcError;
use super::types::{ControlReply, StreamEnvelope, WsTicker, WsTrade};

pub const DEALS_CHANNEL: &str = "spot@public.deals.v3.api";
pub const TICKER_CHANNEL: &str = "spot@public.ticker.v3.api";

#[derive(Debug, Default)]
pub struct ParsedFrame {
    pub channel: String,
    pub events: Vec<MarketEvent>,
    pub dropped: usize,
}

#[derive(Debug)]
pub enum Frame {
    Market(ParsedFrame),
    Control(ControlReply),
    Ignored { channel: String },
}

pub fn parse_frame(raw: &str, received_at: DateTime<Utc>) -> Result<Option<Frame>, MexcError> {
    let json: Value = serde_json::from_str(raw)?;

    if json.get("stream").is_some() {
        let envelope: StreamEnvelope = serde_json::from_value(json)?;
        return parse_envelope(envelope, received_at).map(Some);
    }

    if json.get("id").is_some() || json.get("code").is_some() || json.get("msg").is_some() {
        let reply: ControlReply = serde_json::from_value(json)?;
        return Ok(Some(Frame::Control(reply)));
    }

    Ok(None)
}

fn parse_envelope(envelope: StreamEnvelope, received_at: DateTime<Utc>) -> Result<Frame, MexcError> {
    let StreamEnvelope { stream, data } = envelope;

    if stream.starts_with(DEALS_CHANNEL) {
        let mut frame = ParsedFrame {
            channel: stream,
            ..Default::default()
        };
        for item in items(data)? {
            match decode_item::<WsTrade>(item).and_then(|t| t.into_event(received_at)) {
                Ok(trade) => frame.events.push(MarketEvent::Trade(trade)),
                Err(e) => {
                    debug!(error = %e, channel = %frame.channel, "dropping trade item");
                    frame.dropped += 1;
                }
            }
        }
        return Ok(Frame::Market(frame));
    }

    if stream.starts_with(TICKER_CHANNEL) {
        let mut frame = ParsedFrame {
            channel: stream,
            ..Default::default()
        };
        for item in items(data)? {
            match decode_item::<WsTicker>(item).and_then(|t| t.into_event(received_at)) {
                Ok(update) => frame.events.push(MarketEvent::PriceUpdate(update)),
                Err(e) => {
                    debug!(error = %e, channel = %frame.channel, "dropping ticker item");
                    frame.dropped += 1;
                }
            }
        }
        return Ok(Frame::Market(frame));
    }

    Ok(Frame::Ignored { channel: stream })
}

/// `data` is normally an array; a lone object is accepted as a one-item batch.
fn items(data: Value) -> Result<Vec<Value>, MexcError> {
    match data {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![data]),
        Value::Null => Ok(Vec::new()),
        _ => Err(MexcError::Malformed("data is neither an array nor an object")),
    }
}

fn decode_item<T: DeserializeOwned>(item: Value) -> Result<T, MexcError> {
    Ok(serde_json::from_value(item)?)
}
