//! # Executor Crate
//!
//! Everything between a trading decision and an order on the exchange book.
//!
//! ## Architectural Principles
//!
//! - **Grid Discipline:** Prices and quantities are floored (never rounded up)
//!   to the symbol's tick and step sizes before they leave the process, using
//!   filters cached by the `TickSizeOracle`.
//! - **Execution Abstraction:** The `OrderExecutor` only holds an
//!   `Arc<dyn ExchangeGateway>`, so the engine runs unchanged against the live
//!   exchange or the in-memory mock.
//!
//! ## Public API
//!
//! - `OrderExecutor`: places, cancels and polls stop orders.
//! - `TickSizeOracle`: cached per-symbol filters.
//! - `QuantitySizer`: fixed, percentage and notional sizing.
//! - `RetryPolicy`: bounded polling for orders that are still settling.
//! - `floor_to_tick` / `floor_to_step`.

// Declare the modules that constitute this crate.
pub mod error;
pub mod exchange;
pub mod oracle;
pub mod retry;
pub mod sizing;
pub mod tick;

// Re-export the key components to provide a clean, public-facing API.
pub use error::ExecutorError;
pub use exchange::{OrderExecutor, OrderLookup};
pub use oracle::TickSizeOracle;
pub use retry::RetryPolicy;
pub use sizing::QuantitySizer;
pub use tick::{floor_to_step, floor_to_tick};
