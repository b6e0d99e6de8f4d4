use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The exchange rejected the request ({code}): {msg}")]
    Exchange { code: i64, msg: String },

    #[error("Order {0} does not exist on the exchange")]
    OrderNotFound(i64),

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Kline stream gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

impl ApiError {
    /// `true` when the exchange understood the request and refused it, as
    /// opposed to a transport or decoding failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Exchange { .. } | ApiError::OrderNotFound(_))
    }
}
