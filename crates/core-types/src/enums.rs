use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The literal the exchange expects in the `side` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order status as reported by the exchange.
///
/// The lifecycle manager never sets this locally; it is always the result of
/// a gateway query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    #[serde(alias = "EXPIRED_IN_MATCH")]
    Expired,
    PendingCancel,
}

impl OrderStatus {
    /// `true` for statuses after which the exchange will never fill the order further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
        };
        f.write_str(s)
    }
}

/// The phase of the single-symbol bracket-order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Flat,
    EntryPending,
    Long,
    ExitPending,
    /// Lasts exactly one candle after the exit fill, then collapses to `Flat`.
    JustClosed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Flat => "FLAT",
            Phase::EntryPending => "ENTRY_PENDING",
            Phase::Long => "LONG",
            Phase::ExitPending => "EXIT_PENDING",
            Phase::JustClosed => "JUST_CLOSED",
        };
        f.write_str(s)
    }
}

/// Trend signal derived from two consecutive Heikin-Ashi candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendSignal {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendSignal::Buy => "BUY",
            TrendSignal::Sell => "SELL",
            TrendSignal::Hold => "HOLD",
        };
        f.write_str(s)
    }
}
