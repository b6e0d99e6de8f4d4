use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Strategy received an invalid candle: {0}")]
    InvalidCandle(String),
}
