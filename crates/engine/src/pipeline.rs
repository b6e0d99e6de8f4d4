use crate::aligner::CandleAligner;
use core_types::{HaCandle, Interval, Kline, TrendSignal};
use strategies::{HeikinAshiStrategy, Strategy};
use tracing::debug;

/// Raw kline in, Heikin-Ashi candle and display signal out.
///
/// Backfill and the live stream share one pipeline, so the HA recurrence
/// carries straight on from the last historical candle and live candles that
/// overlap history are dropped by the aligner.
#[derive(Debug, Clone)]
pub struct CandlePipeline {
    aligner: CandleAligner,
    strategy: HeikinAshiStrategy,
}

impl CandlePipeline {
    pub fn new(interval: Interval) -> Self {
        Self {
            aligner: CandleAligner::new(interval),
            strategy: HeikinAshiStrategy::new(),
        }
    }

    /// `None` when the kline is dropped. Malformed or out-of-sequence feed
    /// data is routine, so it only shows up at debug level.
    pub fn process(&mut self, kline: Kline) -> Option<(HaCandle, TrendSignal)> {
        let kline = match self.aligner.accept(kline) {
            Ok(kline) => kline,
            Err(rejection) => {
                debug!(%rejection, "Kline dropped");
                return None;
            }
        };
        match self.strategy.evaluate(&kline) {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(error = %e, "Kline dropped");
                None
            }
        }
    }

    pub fn last_candle(&self) -> Option<&HaCandle> {
        self.strategy.last_candle()
    }

    /// Display position implied by the signals so far.
    pub fn is_long(&self) -> bool {
        self.strategy.is_long()
    }
}
