use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{HaCandle, OrderHandle, OrderSide, Phase, TrendSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A closed candle after the Heikin-Ashi transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub symbol: String,
    pub candle: HaCandle,
    pub signal: TrendSignal,
    /// Phase after the candle was processed.
    pub phase: Phase,
    /// Replayed during backfill; no orders were considered.
    pub historical: bool,
}

/// An order the engine has put on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order: OrderHandle,
    /// Open time of the candle whose HA values priced the order.
    pub candle_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
    pub symbol: String,
    pub entry_price: Option<Decimal>,
    pub exit_price: Decimal,
    pub quantity: Decimal,
}

impl PositionClosed {
    /// Quote-currency result of the round trip, when the entry price is known.
    pub fn pnl(&self) -> Option<Decimal> {
        self.entry_price
            .map(|entry| (self.exit_price - entry) * self.quantity)
    }
}

/// Everything the engine reports while running.
///
/// Serialized adjacently tagged, e.g.
/// `{"type":"EntryFilled","payload":{"symbol":"ETHUSDT",...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    EngineStarted {
        symbol: String,
        interval: String,
        phase: Phase,
    },
    CandleClosed(CandleUpdate),
    EntryPlaced(OrderPlaced),
    EntryFilled {
        symbol: String,
        order_id: i64,
        price: Decimal,
        quantity: Decimal,
    },
    StopPlaced(OrderPlaced),
    /// The trailing stop was replaced at a new trigger.
    StopRepriced {
        symbol: String,
        previous_stop: Decimal,
        order: OrderHandle,
    },
    OrderCanceled {
        symbol: String,
        order_id: i64,
        side: OrderSide,
    },
    OrderFailed {
        symbol: String,
        side: OrderSide,
        reason: String,
    },
    PositionClosed(PositionClosed),
    /// The candle stream gave up; the engine is shutting down.
    StreamFatal {
        symbol: String,
        reason: String,
    },
    EngineStopped {
        symbol: String,
        phase: Phase,
    },
}

impl EngineEvent {
    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Stable short name, handy for log fields and filters.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::EngineStarted { .. } => "engine_started",
            EngineEvent::CandleClosed(_) => "candle_closed",
            EngineEvent::EntryPlaced(_) => "entry_placed",
            EngineEvent::EntryFilled { .. } => "entry_filled",
            EngineEvent::StopPlaced(_) => "stop_placed",
            EngineEvent::StopRepriced { .. } => "stop_repriced",
            EngineEvent::OrderCanceled { .. } => "order_canceled",
            EngineEvent::OrderFailed { .. } => "order_failed",
            EngineEvent::PositionClosed(_) => "position_closed",
            EngineEvent::StreamFatal { .. } => "stream_fatal",
            EngineEvent::EngineStopped { .. } => "engine_stopped",
        }
    }
}
