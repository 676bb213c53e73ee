pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DeliveryError, SettingsError, ThresholdError};
pub use models::*;
pub use ports::{NotificationSink, SettingsProvider};
