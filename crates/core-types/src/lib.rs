pub mod enums;
pub mod error;
pub mod interval;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderStatus, Phase, TrendSignal};
pub use error::CoreError;
pub use interval::{Interval, IntervalUnit};
pub use structs::{HaCandle, Kline, OrderHandle, PositionState, StopOrderRequest, SymbolFilters};
