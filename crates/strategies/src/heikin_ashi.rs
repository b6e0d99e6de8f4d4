use core_types::{HaCandle, Kline};
use rust_decimal::Decimal;

/// One step of the Heikin-Ashi recurrence.
///
/// With no previous candle (first candle of a session) the open is the
/// midpoint of the raw open and close.
pub fn transform(previous: Option<&HaCandle>, current: &Kline) -> HaCandle {
    let ha_close = (current.open + current.high + current.low + current.close) / Decimal::from(4);
    let ha_open = match previous {
        Some(prev) => (prev.ha_open + prev.ha_close) / Decimal::TWO,
        None => (current.open + current.close) / Decimal::TWO,
    };
    HaCandle {
        open_time: current.open_time,
        ha_open,
        ha_high: current.high.max(ha_open).max(ha_close),
        ha_low: current.low.min(ha_open).min(ha_close),
        ha_close,
    }
}

/// Replays the recurrence over a slice of candles, oldest first.
pub fn transform_series(klines: &[Kline]) -> Vec<HaCandle> {
    let mut transformer = HeikinAshiTransformer::default();
    klines.iter().map(|k| transformer.next(k)).collect()
}

/// Carries the previous HA candle between calls.
#[derive(Debug, Clone, Default)]
pub struct HeikinAshiTransformer {
    previous: Option<HaCandle>,
}

impl HeikinAshiTransformer {
    /// Continues a recurrence that was started elsewhere (e.g. during backfill).
    pub fn seeded(previous: HaCandle) -> Self {
        Self {
            previous: Some(previous),
        }
    }

    pub fn next(&mut self, current: &Kline) -> HaCandle {
        let candle = transform(self.previous.as_ref(), current);
        self.previous = Some(candle);
        candle
    }

    pub fn last(&self) -> Option<&HaCandle> {
        self.previous.as_ref()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn kline(minute: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Kline {
        let open_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap();
        Kline {
            symbol: "ETHUSDT".to_string(),
            interval: "5m".to_string(),
            open_time,
            close_time: open_time + chrono::Duration::milliseconds(299_999),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: dec!(1),
            closed: true,
        }
    }

    #[test]
    fn first_candle_uses_raw_midpoint() {
        let ha = transform(None, &kline(0, dec!(10), dec!(14), dec!(8), dec!(12)));
        assert_eq!(ha.ha_open, dec!(11));
        assert_eq!(ha.ha_close, dec!(11));
        assert_eq!(ha.ha_high, dec!(14));
        assert_eq!(ha.ha_low, dec!(8));
    }

    #[test]
    fn later_candles_chain_on_the_previous_ha_candle() {
        let series = transform_series(&[
            kline(0, dec!(10), dec!(14), dec!(8), dec!(12)),
            kline(5, dec!(12), dec!(16), dec!(11), dec!(15)),
            kline(10, dec!(15), dec!(15.5), dec!(9), dec!(9.5)),
        ]);

        // ha_open = (11 + 11) / 2, ha_close = (12+16+11+15)/4
        assert_eq!(series[1].ha_open, dec!(11));
        assert_eq!(series[1].ha_close, dec!(13.5));
        assert_eq!(series[1].ha_high, dec!(16));
        assert_eq!(series[1].ha_low, dec!(11));

        // ha_open = (11 + 13.5) / 2, ha_close = (15+15.5+9+9.5)/4
        assert_eq!(series[2].ha_open, dec!(12.25));
        assert_eq!(series[2].ha_close, dec!(12.25));
        assert_eq!(series[2].ha_high, dec!(15.5));
        assert_eq!(series[2].ha_low, dec!(9));
    }

    #[test]
    fn ha_open_can_set_the_extremes() {
        // A gap down: the carried-over open sits above the raw high.
        let prev = transform(None, &kline(0, dec!(100), dec!(110), dec!(99), dec!(108)));
        let ha = transform(Some(&prev), &kline(5, dec!(90), dec!(91), dec!(85), dec!(86)));
        assert_eq!(ha.ha_open, dec!(104.125));
        assert_eq!(ha.ha_high, dec!(104.125));
        assert_eq!(ha.ha_close, dec!(88));
        assert_eq!(ha.ha_low, dec!(85));
    }

    #[test]
    fn seeded_transformer_matches_series() {
        let klines = [
            kline(0, dec!(10), dec!(14), dec!(8), dec!(12)),
            kline(5, dec!(12), dec!(16), dec!(11), dec!(15)),
        ];
        let series = transform_series(&klines);
        let mut live = HeikinAshiTransformer::seeded(series[0]);
        assert_eq!(live.next(&klines[1]), series[1]);
        assert_eq!(live.last(), Some(&series[1]));

        live.reset();
        assert!(live.last().is_none());
    }
}
