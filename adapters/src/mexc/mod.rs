pub mod errors;
pub mod parser;
pub mod poller;
pub mod rest;
pub mod types;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;

use self::errors::MexcError;
use self::types::{RecentTrade, TickerPrice};

pub use poller::{MexcPoller, PollReport};
pub use rest::{DEFAULT_REST_URL, MexcRestClient};
pub use ws::{ConnectionState, Connected, DEFAULT_WS_URL, MexcStreamClient, StreamConfig};

/// Symbols tracked when nothing else is configured.
pub const DEFAULT_SYMBOLS: [&str; 20] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "SOLUSDT", "XRPUSDT", "DOTUSDT", "DOGEUSDT",
    "AVAXUSDT", "MATICUSDT", "LINKUSDT", "LTCUSDT", "UNIUSDT", "ATOMUSDT", "ETCUSDT", "FILUSDT",
    "TRXUSDT", "XLMUSDT", "VETUSDT", "ALGOUSDT",
];

pub fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

/// Snapshot endpoints of the exchange REST API.
///
/// The poller only talks to this trait so it can be driven by a fake in tests.
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    async fn all_tickers(&self) -> Result<Vec<TickerPrice>, MexcError>;

    async fn recent_trades(&self, symbol: &str, limit: u16) -> Result<Vec<RecentTrade>, MexcError>;

    /// Symbols currently open for trading.
    async fn active_symbols(&self) -> Result<Vec<String>, MexcError>;
}

#[async_trait]
impl<T: SnapshotApi + ?Sized> SnapshotApi for Arc<T> {
    async fn all_tickers(&self) -> Result<Vec<TickerPrice>, MexcError> {
        (**self).all_tickers().await
    }

    async fn recent_trades(&self, symbol: &str, limit: u16) -> Result<Vec<RecentTrade>, MexcError> {
        (**self).recent_trades(symbol, limit).await
    }

    async fn active_symbols(&self) -> Result<Vec<String>, MexcError> {
        (**self).active_symbols().await
    }
}
