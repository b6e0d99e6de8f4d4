use core_types::{HaCandle, TrendSignal};

/// Raw trend read of two consecutive HA candles, ignoring position.
///
/// BUY needs two bullish candles in a row; SELL needs a bearish current candle.
pub fn evaluate(previous: &HaCandle, current: &HaCandle) -> TrendSignal {
    if previous.is_bullish() && current.is_bullish() {
        TrendSignal::Buy
    } else if current.is_bearish() {
        TrendSignal::Sell
    } else {
        TrendSignal::Hold
    }
}

/// Display-only position tracking for signal tables.
///
/// BUY is only reported while flat and SELL only while long, so the table
/// alternates the way a single long-only position would. It never trades.
#[derive(Debug, Clone, Default)]
pub struct SignalTracker {
    long: bool,
}

impl SignalTracker {
    pub fn update(&mut self, previous: Option<&HaCandle>, current: &HaCandle) -> TrendSignal {
        let Some(previous) = previous else {
            return TrendSignal::Hold;
        };
        match (evaluate(previous, current), self.long) {
            (TrendSignal::Buy, false) => {
                self.long = true;
                TrendSignal::Buy
            }
            (TrendSignal::Sell, true) => {
                self.long = false;
                TrendSignal::Sell
            }
            _ => TrendSignal::Hold,
        }
    }

    pub fn is_long(&self) -> bool {
        self.long
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ha(open: Decimal, close: Decimal) -> HaCandle {
        HaCandle {
            open_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            ha_open: open,
            ha_high: open.max(close) + dec!(1),
            ha_low: open.min(close) - dec!(1),
            ha_close: close,
        }
    }

    #[test]
    fn raw_evaluation() {
        let up = ha(dec!(10), dec!(11));
        let down = ha(dec!(11), dec!(10));
        let doji = ha(dec!(10), dec!(10));
        assert_eq!(evaluate(&up, &up), TrendSignal::Buy);
        assert_eq!(evaluate(&down, &up), TrendSignal::Hold);
        assert_eq!(evaluate(&up, &down), TrendSignal::Sell);
        assert_eq!(evaluate(&up, &doji), TrendSignal::Hold);
    }

    #[test]
    fn tracker_alternates_buy_and_sell() {
        let up = ha(dec!(10), dec!(11));
        let down = ha(dec!(11), dec!(10));
        let mut tracker = SignalTracker::default();

        assert_eq!(tracker.update(None, &up), TrendSignal::Hold);
        assert_eq!(tracker.update(Some(&up), &up), TrendSignal::Buy);
        assert!(tracker.is_long());
        // Already long: a second BUY condition is only a HOLD.
        assert_eq!(tracker.update(Some(&up), &up), TrendSignal::Hold);
        assert_eq!(tracker.update(Some(&up), &down), TrendSignal::Sell);
        assert!(!tracker.is_long());
        // Flat: bearish candles stay HOLD.
        assert_eq!(tracker.update(Some(&down), &down), TrendSignal::Hold);
    }
}
