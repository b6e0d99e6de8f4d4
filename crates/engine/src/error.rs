use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API client error: {0}")]
    ApiClient(#[from] api_client::error::ApiError),

    #[error("Execution error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Kline stream failed: {0}")]
    Stream(#[source] api_client::error::ApiError),

    #[error("Short position of {amount} on {symbol}; only long positions are managed")]
    ShortPosition { symbol: String, amount: Decimal },

    #[error("Engine task failed: {0}")]
    Task(String),
}
