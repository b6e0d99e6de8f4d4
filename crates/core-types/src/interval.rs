use crate::error::CoreError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Kline intervals offered by Binance USDⓈ-M futures streams.
const SUPPORTED: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

/// A kline interval such as `5m` or `1M`.
///
/// Parsed from the exchange notation. Note the case sensitivity: `1m` is one
/// minute, `1M` is one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub count: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    /// Length of one interval in milliseconds. `None` for months.
    pub fn fixed_millis(&self) -> Option<i64> {
        let unit_ms = match self.unit {
            IntervalUnit::Second => SECOND_MS,
            IntervalUnit::Minute => MINUTE_MS,
            IntervalUnit::Hour => HOUR_MS,
            IntervalUnit::Day => DAY_MS,
            IntervalUnit::Week => 7 * DAY_MS,
            IntervalUnit::Month => return None,
        };
        Some(unit_ms * i64::from(self.count))
    }

    /// Truncates `time` to the start of the interval that contains it.
    ///
    /// Seconds, minutes, hours and multi-day intervals are aligned on the Unix
    /// epoch, weeks start on Monday 00:00 UTC and months on day 1 00:00 UTC.
    pub fn align(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let ms = time.timestamp_millis();
        match self.unit {
            IntervalUnit::Week => {
                // 1970-01-01 was a Thursday; shift so that Monday is the boundary.
                let monday_offset = 3 * DAY_MS;
                let aligned = ms - (ms + monday_offset).rem_euclid(7 * DAY_MS);
                from_millis(aligned)
            }
            IntervalUnit::Month => {
                let month0 = time.month0() / self.count * self.count;
                NaiveDate::from_ymd_opt(time.year(), month0 + 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
                    .unwrap_or(time)
            }
            _ => {
                let len = self.fixed_millis().unwrap_or(1);
                from_millis(ms - ms.rem_euclid(len))
            }
        }
    }

    /// `true` when `time` sits exactly on an interval boundary.
    pub fn is_aligned(&self, time: DateTime<Utc>) -> bool {
        self.align(time) == time
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !SUPPORTED.contains(&s) {
            return Err(CoreError::UnsupportedInterval(s.to_string()));
        }
        let (digits, unit) = s.split_at(s.len() - 1);
        let count: u32 = digits
            .parse()
            .map_err(|_| CoreError::UnsupportedInterval(s.to_string()))?;
        let unit = match unit {
            "s" => IntervalUnit::Second,
            "m" => IntervalUnit::Minute,
            "h" => IntervalUnit::Hour,
            "d" => IntervalUnit::Day,
            "w" => IntervalUnit::Week,
            "M" => IntervalUnit::Month,
            _ => return Err(CoreError::UnsupportedInterval(s.to_string())),
        };
        Ok(Self { count, unit })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            IntervalUnit::Second => "s",
            IntervalUnit::Minute => "m",
            IntervalUnit::Hour => "h",
            IntervalUnit::Day => "d",
            IntervalUnit::Week => "w",
            IntervalUnit::Month => "M",
        };
        write!(f, "{}{}", self.count, unit)
    }
}

impl Serialize for Interval {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_exchange_notation() {
        let five: Interval = "5m".parse().unwrap();
        assert_eq!(five, Interval { count: 5, unit: IntervalUnit::Minute });
        let month: Interval = "1M".parse().unwrap();
        assert_eq!(month.unit, IntervalUnit::Month);
        assert_eq!(month.to_string(), "1M");
        assert!("7m".parse::<Interval>().is_err());
        assert!("".parse::<Interval>().is_err());
    }

    #[test]
    fn five_minute_boundaries() {
        let iv: Interval = "5m".parse().unwrap();
        assert!(iv.is_aligned(at("2024-03-01T12:05:00Z")));
        assert!(iv.is_aligned(at("2024-03-01T12:55:00Z")));
        assert!(!iv.is_aligned(at("2024-03-01T12:06:00Z")));
        assert!(!iv.is_aligned(at("2024-03-01T12:05:30Z")));
        assert_eq!(iv.align(at("2024-03-01T12:09:59Z")), at("2024-03-01T12:05:00Z"));
    }

    #[test]
    fn hour_and_day_boundaries() {
        let four_h: Interval = "4h".parse().unwrap();
        assert_eq!(four_h.align(at("2024-03-01T07:30:00Z")), at("2024-03-01T04:00:00Z"));
        let day: Interval = "1d".parse().unwrap();
        assert_eq!(day.align(at("2024-03-01T23:59:59Z")), at("2024-03-01T00:00:00Z"));
        let three_d: Interval = "3d".parse().unwrap();
        // Epoch day 19782 (2024-02-29) is a multiple of three.
        assert_eq!(three_d.align(at("2024-03-02T10:00:00Z")), at("2024-02-29T00:00:00Z"));
    }

    #[test]
    fn weeks_start_on_monday() {
        let week: Interval = "1w".parse().unwrap();
        // 2024-03-07 is a Thursday.
        assert_eq!(week.align(at("2024-03-07T15:00:00Z")), at("2024-03-04T00:00:00Z"));
        assert!(week.is_aligned(at("2024-03-04T00:00:00Z")));
    }

    #[test]
    fn months_truncate_to_first_day() {
        let month: Interval = "1M".parse().unwrap();
        assert_eq!(month.align(at("2024-03-17T08:00:00Z")), at("2024-03-01T00:00:00Z"));
        assert!(!month.is_aligned(at("2024-03-02T00:00:00Z")));
    }
}
