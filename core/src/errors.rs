use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThresholdError {
    #[error("window must be a positive number of seconds")]
    NonPositiveWindow,

    #[error("window of {0}s is out of range")]
    WindowTooLarge(u64),

    #[error("price change threshold must be positive, got {0}")]
    NonPositiveChange(Decimal),

    #[error("invalid value '{value}' for {key}")]
    Unparsable { key: &'static str, value: String },

    #[error("unknown setting '{0}', expected one of: time, volume, change")]
    UnknownKey(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings backend unavailable: {0}")]
    Backend(String),

    #[error("stored thresholds are invalid: {0}")]
    Invalid(#[from] ThresholdError),

    #[error("setting '{0}' is missing")]
    Missing(&'static str),

    #[error("invalid suppression: {0}")]
    InvalidSuppression(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by receiver: {0}")]
    Rejected(String),

    #[error("no recipients configured")]
    NoRecipients,
}
