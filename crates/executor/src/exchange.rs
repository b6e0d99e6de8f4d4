use crate::error::ExecutorError;
use crate::oracle::TickSizeOracle;
use crate::retry::RetryPolicy;
use crate::sizing::QuantitySizer;
use crate::tick::{floor_to_step, floor_to_tick};
use api_client::error::ApiError;
use api_client::ExchangeGateway;
use core_types::{OrderHandle, OrderSide, OrderStatus, StopOrderRequest, SymbolFilters};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of asking the exchange about an order we track.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    Found(OrderHandle),
    /// The exchange has no record of the order.
    NotFound,
}

impl OrderLookup {
    /// Unknown orders are treated exactly like cancelled ones.
    pub fn status(&self) -> OrderStatus {
        match self {
            OrderLookup::Found(order) => order.status,
            OrderLookup::NotFound => OrderStatus::Canceled,
        }
    }

    pub fn executed_quantity(&self) -> Decimal {
        match self {
            OrderLookup::Found(order) => order.executed_quantity,
            OrderLookup::NotFound => Decimal::ZERO,
        }
    }
}

/// Sends stop orders to the exchange on the symbol's price and lot grid.
///
/// Everything the order lifecycle needs from the exchange goes through here:
/// rounding, sizing, placement, cancellation and status polling.
pub struct OrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    oracle: TickSizeOracle,
    sizer: QuantitySizer,
    retry: RetryPolicy,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, sizer: QuantitySizer, retry: RetryPolicy) -> Self {
        Self {
            oracle: TickSizeOracle::new(gateway.clone()),
            gateway,
            sizer,
            retry,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    pub async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutorError> {
        self.oracle.filters(symbol).await
    }

    pub async fn last_price(&self, symbol: &str) -> Result<Decimal, ExecutorError> {
        Ok(self.gateway.get_last_price(symbol).await?)
    }

    /// Raw entry quantity for an order at `entry_price`, before stepping.
    pub async fn entry_quantity(&self, entry_price: Decimal) -> Result<Decimal, ExecutorError> {
        self.sizer
            .entry_quantity(self.gateway.as_ref(), entry_price)
            .await
    }

    /// Floors the request onto the symbol's grid and submits it.
    ///
    /// Entries below the exchange's minimum notional are refused locally.
    /// Closing stops are always sent.
    pub async fn place_stop(
        &self,
        mut request: StopOrderRequest,
    ) -> Result<OrderHandle, ExecutorError> {
        let filters = self.filters(&request.symbol).await?;
        request.price = floor_to_tick(request.price, filters.tick_size);
        request.stop_price = floor_to_tick(request.stop_price, filters.tick_size);
        if request.stop_price <= Decimal::ZERO || request.price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidPrice(format!(
                "stop {} / limit {}",
                request.stop_price, request.price
            )));
        }

        let stepped = floor_to_step(request.quantity, filters.step_size);
        if stepped <= Decimal::ZERO {
            return Err(ExecutorError::QuantityTooSmall {
                quantity: request.quantity,
                step_size: filters.step_size,
            });
        }
        request.quantity = stepped;

        if request.side == OrderSide::Buy {
            let notional = request.quantity * request.price;
            if notional < filters.min_notional {
                return Err(ExecutorError::BelowMinNotional {
                    notional,
                    min_notional: filters.min_notional,
                });
            }
        }

        let handle = self.gateway.place_stop_order(&request).await?;
        info!(
            symbol = %handle.symbol,
            order_id = handle.order_id,
            side = handle.side.as_str(),
            price = %handle.price,
            stop_price = %handle.stop_price,
            quantity = %handle.quantity,
            "Stop order placed"
        );
        Ok(handle)
    }

    /// `true` only if the exchange confirmed the cancellation.
    pub async fn cancel(&self, symbol: &str, order_id: i64) -> Result<bool, ExecutorError> {
        let cancelled = self.gateway.cancel_order(symbol, order_id).await?;
        if cancelled {
            info!(symbol, order_id, "Order cancelled");
        }
        Ok(cancelled)
    }

    pub async fn lookup(&self, symbol: &str, order_id: i64) -> Result<OrderLookup, ExecutorError> {
        match self.gateway.get_order(symbol, order_id).await {
            Ok(order) => Ok(OrderLookup::Found(order)),
            Err(ApiError::OrderNotFound(_)) => Ok(OrderLookup::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Queries the order, re-polling while it is still in flux
    /// (`PARTIALLY_FILLED`, `PENDING_CANCEL`) up to the retry budget.
    pub async fn settle(&self, symbol: &str, order_id: i64) -> Result<OrderLookup, ExecutorError> {
        let attempts = self.retry.attempts.max(1);
        let mut lookup = self.lookup(symbol, order_id).await?;
        for attempt in 2..=attempts {
            if !matches!(
                lookup.status(),
                OrderStatus::PartiallyFilled | OrderStatus::PendingCancel
            ) {
                break;
            }
            debug!(symbol, order_id, attempt, status = %lookup.status(), "Order not settled, polling again");
            tokio::time::sleep(self.retry.delay).await;
            lookup = self.lookup(symbol, order_id).await?;
        }
        Ok(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::MockExchange;
    use configuration::QuantityConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn setup() -> (Arc<MockExchange>, OrderExecutor) {
        let mock = Arc::new(MockExchange::new(SymbolFilters {
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_notional: dec!(20),
        }));
        let executor = OrderExecutor::new(
            mock.clone(),
            QuantitySizer::new(QuantityConfig::Fixed { quantity: dec!(1) }),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (mock, executor)
    }

    fn request(side: OrderSide, price: Decimal, stop: Decimal, quantity: Decimal) -> StopOrderRequest {
        StopOrderRequest {
            symbol: "ETHUSDT".to_string(),
            side,
            price,
            stop_price: stop,
            quantity,
        }
    }

    #[tokio::test]
    async fn prices_and_quantity_are_floored_before_placement() {
        let (mock, executor) = setup();
        mock.set_last_price(dec!(99.5)).await;

        let handle = executor
            .place_stop(request(OrderSide::Buy, dec!(100.109), dec!(100.004), dec!(0.5129)))
            .await
            .unwrap();
        assert_eq!(handle.price, dec!(100.10));
        assert_eq!(handle.stop_price, dec!(100.00));
        assert_eq!(handle.quantity, dec!(0.512));
    }

    #[tokio::test]
    async fn small_entries_are_refused_locally() {
        let (mock, executor) = setup();
        mock.set_last_price(dec!(99.5)).await;

        let err = executor
            .place_stop(request(OrderSide::Buy, dec!(100.1), dec!(100), dec!(0.1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::BelowMinNotional { .. }));
        assert!(err.is_rejection());

        let err = executor
            .place_stop(request(OrderSide::Buy, dec!(100.1), dec!(100), dec!(0.0004)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::QuantityTooSmall { .. }));
        assert!(mock.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn closing_stops_ignore_min_notional() {
        let (mock, executor) = setup();
        mock.set_last_price(dec!(100)).await;
        let handle = executor
            .place_stop(request(OrderSide::Sell, dec!(97.9), dec!(97.9), dec!(0.1)))
            .await
            .unwrap();
        assert_eq!(handle.side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn unknown_orders_look_cancelled() {
        let (_mock, executor) = setup();
        let lookup = executor.lookup("ETHUSDT", 404).await.unwrap();
        assert_eq!(lookup, OrderLookup::NotFound);
        assert_eq!(lookup.status(), OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn settle_stops_polling_once_the_order_is_final() {
        let (mock, executor) = setup();
        mock.set_last_price(dec!(99.5)).await;
        let handle = executor
            .place_stop(request(OrderSide::Buy, dec!(100.1), dec!(100), dec!(1)))
            .await
            .unwrap();

        mock.partially_fill(handle.order_id, dec!(0.4), dec!(100.1)).await;
        let lookup = executor.settle("ETHUSDT", handle.order_id).await.unwrap();
        assert_eq!(lookup.status(), OrderStatus::PartiallyFilled);

        mock.fill_order(handle.order_id, dec!(100.1)).await;
        let lookup = executor.settle("ETHUSDT", handle.order_id).await.unwrap();
        assert_eq!(lookup.status(), OrderStatus::Filled);
    }

    #[tokio::test]
    async fn gateway_failures_propagate() {
        let (mock, executor) = setup();
        mock.fail_queries(true).await;
        let err = executor.lookup("ETHUSDT", 1).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Api(ApiError::Exchange { code: -1001, .. })));
    }
}
