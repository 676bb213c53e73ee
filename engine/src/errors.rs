use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("negative notional {notional} for {symbol}")]
    NegativeNotional { symbol: String, notional: Decimal },

    #[error("notional overflow for {symbol}")]
    Overflow { symbol: String },
}
