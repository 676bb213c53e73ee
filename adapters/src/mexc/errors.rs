use thiserror::Error;

#[derive(Error, Debug)]
pub enum MexcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid decimal in field '{field}': '{value}'")]
    Decimal { field: &'static str, value: String },

    #[error("invalid timestamp {0}")]
    Timestamp(i64),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Failure to establish or keep the stream connection.
///
/// Always recoverable: the background worker retries after the backoff.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("subscription request failed: {0}")]
    Subscribe(String),

    #[error("client already connected")]
    AlreadyConnected,

    #[error("shutdown requested")]
    Cancelled,
}
