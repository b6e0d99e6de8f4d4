use chrono::{DateTime, Utc};
use core_types::{Interval, Kline};
use std::fmt;

/// Why a candle was not let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The exchange has not finalized the candle yet.
    NotClosed,
    /// The open time is not on an interval boundary.
    Misaligned {
        open_time: DateTime<Utc>,
        boundary: DateTime<Utc>,
    },
    /// Not newer than the last accepted candle; equal times are duplicates.
    Stale {
        open_time: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotClosed => write!(f, "candle still open"),
            Rejection::Misaligned {
                open_time,
                boundary,
            } => write!(f, "open time {} is not on a boundary ({})", open_time, boundary),
            Rejection::Stale {
                open_time,
                last_accepted,
            } => write!(
                f,
                "open time {} is not after last accepted {}",
                open_time, last_accepted
            ),
        }
    }
}

/// Gatekeeper between the raw feed and the strategy.
///
/// Only closed candles that sit on an interval boundary and are strictly newer
/// than everything accepted so far get through, so the consumer sees a
/// strictly increasing sequence.
#[derive(Debug, Clone)]
pub struct CandleAligner {
    interval: Interval,
    last_accepted: Option<DateTime<Utc>>,
}

impl CandleAligner {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Starts after `last` (typically the newest backfilled candle), so live
    /// candles that overlap history are dropped.
    pub fn seed(&mut self, last: DateTime<Utc>) {
        self.last_accepted = Some(last);
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    pub fn accept(&mut self, kline: Kline) -> Result<Kline, Rejection> {
        if !kline.closed {
            return Err(Rejection::NotClosed);
        }
        let boundary = self.interval.align(kline.open_time);
        if boundary != kline.open_time {
            return Err(Rejection::Misaligned {
                open_time: kline.open_time,
                boundary,
            });
        }
        if let Some(last) = self.last_accepted {
            if kline.open_time <= last {
                return Err(Rejection::Stale {
                    open_time: kline.open_time,
                    last_accepted: last,
                });
            }
        }
        self.last_accepted = Some(kline.open_time);
        Ok(kline)
    }
}
