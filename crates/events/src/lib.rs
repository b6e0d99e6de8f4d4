//! # Engine Events
//!
//! This crate defines the notification events the trading engine publishes on
//! its broadcast channel, for alerters and any other observer.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the definitive
//! language for everything the engine reports.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{CandleUpdate, EngineEvent, OrderPlaced, PositionClosed};
