use crate::error::EngineError;
use api_client::ExchangeGateway;
use core_types::{OrderHandle, OrderSide, Phase, PositionState};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Rebuilds the lifecycle state from what the exchange reports at startup.
///
/// The exchange is the only source of truth: nothing is persisted locally, so
/// after a restart the open position and any working stop orders are adopted
/// as they are. Adopted orders have no creating candle and are treated as
/// older than every live candle, which means the first live candle re-prices
/// them.
pub struct StateReconciler {
    gateway: Arc<dyn ExchangeGateway>,
}

impl StateReconciler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    pub async fn rehydrate(&self, symbol: &str) -> Result<PositionState, EngineError> {
        let (positions, orders) = tokio::join!(
            self.gateway.get_open_positions(),
            self.gateway.get_open_orders(symbol)
        );
        let positions = positions?;
        let orders = orders?;

        let mut held = Decimal::ZERO;
        let mut entry_price = None;
        for position in positions.iter().filter(|p| p.symbol == symbol) {
            if position.position_amt.is_sign_negative() && !position.position_amt.is_zero() {
                return Err(EngineError::ShortPosition {
                    symbol: symbol.to_string(),
                    amount: position.position_amt,
                });
            }
            if position.position_amt > Decimal::ZERO {
                held += position.position_amt;
                entry_price = Some(position.entry_price);
            }
        }

        let (mut buys, mut sells): (Vec<OrderHandle>, Vec<OrderHandle>) =
            orders.into_iter().partition(|o| o.side == OrderSide::Buy);
        // Newest order last; it is the one worth adopting.
        buys.sort_by_key(|o| o.order_id);
        sells.sort_by_key(|o| o.order_id);

        let state = if held > Decimal::ZERO {
            self.cancel_strays(symbol, &buys).await;
            let stop = sells.pop();
            self.cancel_strays(symbol, &sells).await;
            let phase = if stop.is_some() {
                Phase::ExitPending
            } else {
                Phase::Long
            };
            PositionState {
                phase,
                active_exit_order: stop,
                entry_fill_price: entry_price,
                position_quantity: Some(held),
                ..PositionState::default()
            }
        } else {
            self.cancel_strays(symbol, &sells).await;
            let entry = buys.pop();
            self.cancel_strays(symbol, &buys).await;
            let phase = if entry.is_some() {
                Phase::EntryPending
            } else {
                Phase::Flat
            };
            PositionState {
                phase,
                active_entry_order: entry,
                ..PositionState::default()
            }
        };

        info!(
            symbol,
            phase = %state.phase,
            position = %held,
            entry_order = ?state.active_entry_order.as_ref().map(|o| o.order_id),
            exit_order = ?state.active_exit_order.as_ref().map(|o| o.order_id),
            "Startup state rebuilt from the exchange"
        );
        Ok(state)
    }

    /// Orders that do not fit the single-bracket model would trade behind the
    /// engine's back, so they are pulled.
    async fn cancel_strays(&self, symbol: &str, orders: &[OrderHandle]) {
        for order in orders {
            match self.gateway.cancel_order(symbol, order.order_id).await {
                Ok(true) => warn!(
                    symbol,
                    order_id = order.order_id,
                    side = order.side.as_str(),
                    "Cancelled stray open order"
                ),
                Ok(false) => warn!(symbol, order_id = order.order_id, "Stray open order could not be cancelled"),
                Err(e) => warn!(symbol, order_id = order.order_id, error = %e, "Cancelling stray open order failed"),
            }
        }
    }
}
