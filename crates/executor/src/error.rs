use api_client::error::ApiError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Order value {notional} is below the exchange minimum of {min_notional}")]
    BelowMinNotional {
        notional: Decimal,
        min_notional: Decimal,
    },

    #[error("Quantity {quantity} rounds to zero with step size {step_size}")]
    QuantityTooSmall { quantity: Decimal, step_size: Decimal },

    #[error("No available {0} balance to size the order")]
    InsufficientBalance(String),

    #[error("Invalid order price: {0}")]
    InvalidPrice(String),
}

impl ExecutorError {
    /// Rejections are expected under changing prices and are simply retried
    /// on the next candle.
    pub fn is_rejection(&self) -> bool {
        match self {
            ExecutorError::Api(e) => e.is_rejection(),
            _ => true,
        }
    }
}
