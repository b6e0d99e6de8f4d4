//! # Strategy Library
//!
//! The Heikin-Ashi arithmetic and the trend signals derived from it.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** This is a pure logic crate. It has no knowledge of
//!   APIs, channels or execution. It depends only on `core-types`.
//! - **Deterministic:** Every function here is a plain function of its inputs,
//!   so backfill replays and live processing produce identical candles.
//!
//! ## Public API
//!
//! - `transform` / `HeikinAshiTransformer`: the HA recurrence.
//! - `evaluate` / `SignalTracker`: BUY/SELL/HOLD for display tables.
//! - `HeikinAshiStrategy`: both of the above behind the `Strategy` trait.

// Declare all the modules that constitute this crate.
pub mod error;
pub mod heikin_ashi;
pub mod signal;

// Re-export the key components to create a clean, public-facing API.
pub use error::StrategyError;
pub use heikin_ashi::{transform, transform_series, HeikinAshiTransformer};
pub use signal::{evaluate, SignalTracker};

use core_types::{HaCandle, Kline, TrendSignal};

/// The core trait that all trading strategies implement.
///
/// The `&mut self` in `evaluate` is crucial, as the strategy carries the
/// previous HA candle and the display position between bars.
pub trait Strategy: Send + Sync {
    /// Evaluates the strategy on a new closed kline.
    ///
    /// Returns the derived HA candle together with the trend signal.
    fn evaluate(&mut self, kline: &Kline) -> Result<(HaCandle, TrendSignal), StrategyError>;
}

/// Heikin-Ashi transform plus display signal tracking.
#[derive(Debug, Clone, Default)]
pub struct HeikinAshiStrategy {
    transformer: HeikinAshiTransformer,
    tracker: SignalTracker,
}

impl HeikinAshiStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_candle(&self) -> Option<&HaCandle> {
        self.transformer.last()
    }

    pub fn is_long(&self) -> bool {
        self.tracker.is_long()
    }
}

impl Strategy for HeikinAshiStrategy {
    fn evaluate(&mut self, kline: &Kline) -> Result<(HaCandle, TrendSignal), StrategyError> {
        if kline.high < kline.low {
            return Err(StrategyError::InvalidCandle(format!(
                "{} {}: high {} below low {}",
                kline.symbol, kline.open_time, kline.high, kline.low
            )));
        }
        let previous = self.transformer.last().copied();
        let candle = self.transformer.next(kline);
        let signal = self.tracker.update(previous.as_ref(), &candle);
        tracing::debug!(
            open_time = %candle.open_time,
            ha_open = %candle.ha_open,
            ha_close = %candle.ha_close,
            %signal,
            "Heikin-Ashi candle evaluated"
        );
        Ok((candle, signal))
    }
}
