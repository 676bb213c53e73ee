pub mod format;
pub mod log;
pub mod telegram;

pub use log::LogSink;
pub use telegram::{DEFAULT_TELEGRAM_API, TelegramSink};
