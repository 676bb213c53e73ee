use std::time::Duration;

use async_trait::async_trait;
use corelib::{AlertEvent, DeliveryError, NotificationSink};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::format::format_alert_message;

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers alerts through the Telegram Bot API to a fixed set of chats.
#[derive(Clone)]
pub struct TelegramSink {
    http: Client,
    api_url: String,
    token: String,
    chat_ids: Vec<i64>,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>, chat_ids: Vec<i64>) -> Result<Self, DeliveryError> {
        Self::with_api_url(DEFAULT_TELEGRAM_API, token, chat_ids)
    }

    pub fn with_api_url(
        api_url: impl Into<String>,
        token: impl Into<String>,
        chat_ids: Vec<i64>,
    ) -> Result<Self, DeliveryError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_ids,
        })
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            // reqwest errors carry the url, which carries the token
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        let reply: ApiReply = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        if !reply.ok {
            return Err(DeliveryError::Rejected(format!(
                "{status}: {}",
                reply.description.unwrap_or_default()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    #[instrument(skip(self, alert), fields(symbol = %alert.symbol, chats = self.chat_ids.len()))]
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        if self.chat_ids.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let text = format_alert_message(alert);
        let mut delivered = 0usize;
        let mut last_err = None;

        for &chat_id in &self.chat_ids {
            match self.send_to(chat_id, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(chat_id, error = %e, "telegram delivery failed");
                    last_err = Some(e);
                }
            }
        }

        if delivered > 0 {
            info!(delivered, "alert sent to telegram");
            return Ok(());
        }

        Err(last_err.unwrap_or(DeliveryError::NoRecipients))
    }
}
