use crate::enums::{OrderSide, OrderStatus, Phase};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single raw candlestick as delivered by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Whether the exchange has marked the candle final.
    pub closed: bool,
}

/// A Heikin-Ashi candle derived from a raw `Kline` and the previous HA candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HaCandle {
    pub open_time: DateTime<Utc>,
    pub ha_open: Decimal,
    pub ha_high: Decimal,
    pub ha_low: Decimal,
    pub ha_close: Decimal,
}

impl HaCandle {
    pub fn is_bullish(&self) -> bool {
        self.ha_close > self.ha_open
    }

    pub fn is_bearish(&self) -> bool {
        self.ha_close < self.ha_open
    }
}

/// A stop order to be submitted to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Limit price once the stop triggers.
    pub price: Decimal,
    pub stop_price: Decimal,
    pub quantity: Decimal,
}

/// The engine's view of an order, always taken from an exchange response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub stop_price: Decimal,
    /// Originally requested quantity.
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    /// Average fill price; zero until something has filled.
    pub avg_price: Decimal,
    pub status: OrderStatus,
}

impl OrderHandle {
    /// The price the order actually filled at, falling back to its limit price
    /// when the exchange has not reported an average.
    pub fn fill_price(&self) -> Decimal {
        if self.avg_price.is_zero() {
            self.price
        } else {
            self.avg_price
        }
    }
}

/// Trading rules the exchange enforces for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
}

/// Position and in-flight orders for the traded symbol.
///
/// Only the order lifecycle manager mutates this; everybody else gets clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub phase: Phase,
    pub active_entry_order: Option<OrderHandle>,
    pub active_exit_order: Option<OrderHandle>,
    pub entry_fill_price: Option<Decimal>,
    /// Open time of the candle that created the active entry order.
    pub entry_candle_time: Option<DateTime<Utc>>,
    /// Open time of the candle that created the active exit order.
    pub exit_candle_time: Option<DateTime<Utc>>,
    /// Quantity actually held, as reported filled by the exchange.
    pub position_quantity: Option<Decimal>,
    pub last_exit_price: Option<Decimal>,
}

impl PositionState {
    pub fn is_consistent(&self) -> bool {
        let one_order = !(self.active_entry_order.is_some() && self.active_exit_order.is_some());
        let long_has_fill = self.phase != Phase::Long || self.entry_fill_price.is_some();
        one_order && long_has_fill
    }
}
