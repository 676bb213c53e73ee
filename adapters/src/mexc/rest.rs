use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::SnapshotApi;
use super::errors::MexcError;
use super::types::{ExchangeInfo, RecentTrade, TickerPrice};

pub const DEFAULT_REST_URL: &str = "https://api.mexc.com";

#[derive(Clone)]
pub struct MexcRestClient {
    http: Client,
    base_url: String,
}

impl MexcRestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MexcError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SnapshotApi for MexcRestClient {
    #[instrument(skip(self), level = "debug")]
    async fn all_tickers(&self) -> Result<Vec<TickerPrice>, MexcError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let tickers: Vec<TickerPrice> = resp.json().await?;

        debug!(count = tickers.len(), "tickers fetched");
        Ok(tickers)
    }

    #[instrument(skip(self), fields(symbol = %symbol), level = "debug")]
    async fn recent_trades(&self, symbol: &str, limit: u16) -> Result<Vec<RecentTrade>, MexcError> {
        let url = format!("{}/api/v3/trades", self.base_url);

        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol.to_string()), ("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let trades: Vec<RecentTrade> = resp.json().await?;

        debug!(count = trades.len(), "recent trades fetched");
        Ok(trades)
    }

    #[instrument(skip(self), level = "debug")]
    async fn active_symbols(&self) -> Result<Vec<String>, MexcError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);

        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let info: ExchangeInfo = resp.json().await?;

        let active: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.is_trading())
            .map(|s| s.symbol)
            .collect();

        debug!(count = active.len(), "active symbols fetched");
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = MexcRestClient::new("https://api.mexc.com/").unwrap();
        assert_eq!(client.base_url(), "https://api.mexc.com");
    }
}
