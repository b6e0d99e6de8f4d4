//! In-memory exchange used by the engine's tests and by dry runs.

use crate::error::ApiError;
use crate::responses::{BalanceResponse, PositionResponse};
use crate::ExchangeGateway;
use async_trait::async_trait;
use core_types::{
    Kline, OrderHandle, OrderSide, OrderStatus, StopOrderRequest, SymbolFilters,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug)]
struct MockState {
    next_order_id: i64,
    orders: BTreeMap<i64, OrderHandle>,
    /// Orders that still exist locally but which the exchange claims not to know.
    forgotten: HashSet<i64>,
    placed: Vec<StopOrderRequest>,
    cancelled: Vec<i64>,
    last_price: Decimal,
    filters: SymbolFilters,
    reject_next: Option<(i64, String)>,
    fail_cancels: bool,
    fail_queries: bool,
    /// Executed quantity and price applied just before the next cancel.
    fill_before_cancel: Option<(Decimal, Decimal)>,
    positions: Vec<PositionResponse>,
    balances: Vec<BalanceResponse>,
    klines: Vec<Kline>,
}

/// A scriptable `ExchangeGateway`.
///
/// Orders are accepted as `NEW` and only change status when the test says so.
/// Like the real exchange it refuses prices off the tick grid (-4014) and
/// stops that would trigger immediately against the last price (-2021).
#[derive(Debug)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new(filters: SymbolFilters) -> Self {
        Self {
            state: Mutex::new(MockState {
                next_order_id: 1,
                orders: BTreeMap::new(),
                forgotten: HashSet::new(),
                placed: Vec::new(),
                cancelled: Vec::new(),
                last_price: Decimal::ZERO,
                filters,
                reject_next: None,
                fail_cancels: false,
                fail_queries: false,
                fill_before_cancel: None,
                positions: Vec::new(),
                balances: Vec::new(),
                klines: Vec::new(),
            }),
        }
    }

    pub async fn set_last_price(&self, price: Decimal) {
        self.state.lock().await.last_price = price;
    }

    /// Fills the whole order at `avg_price`.
    pub async fn fill_order(&self, order_id: i64, avg_price: Decimal) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::Filled;
            order.executed_quantity = order.quantity;
            order.avg_price = avg_price;
        }
    }

    pub async fn partially_fill(&self, order_id: i64, executed: Decimal, avg_price: Decimal) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::PartiallyFilled;
            order.executed_quantity = executed;
            order.avg_price = avg_price;
        }
    }

    pub async fn set_order_status(&self, order_id: i64, status: OrderStatus) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = status;
        }
    }

    /// The next `place_stop_order` fails with the given exchange error.
    pub async fn reject_next_order(&self, code: i64, msg: &str) {
        self.state.lock().await.reject_next = Some((code, msg.to_string()));
    }

    pub async fn fail_cancels(&self, fail: bool) {
        self.state.lock().await.fail_cancels = fail;
    }

    /// The next cancel request arrives after `executed` has traded at
    /// `avg_price`. A full fill leaves nothing to cancel.
    pub async fn fill_before_cancel(&self, executed: Decimal, avg_price: Decimal) {
        self.state.lock().await.fill_before_cancel = Some((executed, avg_price));
    }

    /// Makes `get_order` fail as if the exchange were unreachable.
    pub async fn fail_queries(&self, fail: bool) {
        self.state.lock().await.fail_queries = fail;
    }

    pub async fn set_positions(&self, positions: Vec<PositionResponse>) {
        self.state.lock().await.positions = positions;
    }

    pub async fn set_balances(&self, balances: Vec<BalanceResponse>) {
        self.state.lock().await.balances = balances;
    }

    pub async fn set_klines(&self, klines: Vec<Kline>) {
        self.state.lock().await.klines = klines;
    }

    /// Registers an order that exists on the book before the engine starts.
    pub async fn add_open_order(&self, order: OrderHandle) {
        let mut state = self.state.lock().await;
        state.next_order_id = state.next_order_id.max(order.order_id + 1);
        state.orders.insert(order.order_id, order);
    }

    /// The exchange stops knowing about the order (`get_order` → not found).
    pub async fn forget_order(&self, order_id: i64) {
        self.state.lock().await.forgotten.insert(order_id);
    }

    pub async fn placed_orders(&self) -> Vec<StopOrderRequest> {
        self.state.lock().await.placed.clone()
    }

    pub async fn cancelled_orders(&self) -> Vec<i64> {
        self.state.lock().await.cancelled.clone()
    }

    pub async fn order(&self, order_id: i64) -> Option<OrderHandle> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }
}

fn rejection(code: i64, msg: &str) -> ApiError {
    ApiError::Exchange {
        code,
        msg: msg.to_string(),
    }
}

fn on_grid(value: Decimal, increment: Decimal) -> bool {
    increment.is_zero() || (value % increment).is_zero()
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, ApiError> {
        let state = self.state.lock().await;
        let matching: Vec<Kline> = state
            .klines
            .iter()
            .filter(|k| k.symbol == symbol && k.interval == interval)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn place_stop_order(&self, order: &StopOrderRequest) -> Result<OrderHandle, ApiError> {
        let mut state = self.state.lock().await;
        if let Some((code, msg)) = state.reject_next.take() {
            return Err(rejection(code, &msg));
        }
        if !on_grid(order.price, state.filters.tick_size)
            || !on_grid(order.stop_price, state.filters.tick_size)
        {
            return Err(rejection(-4014, "Price not increased by tick size."));
        }
        if order.quantity <= Decimal::ZERO || !on_grid(order.quantity, state.filters.step_size) {
            return Err(rejection(-4003, "Quantity less than or equal to zero."));
        }
        let immediate = match order.side {
            OrderSide::Buy => order.stop_price <= state.last_price,
            OrderSide::Sell => order.stop_price >= state.last_price,
        };
        if immediate {
            return Err(rejection(-2021, "Order would immediately trigger."));
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        let handle = OrderHandle {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            stop_price: order.stop_price,
            quantity: order.quantity,
            executed_quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            status: OrderStatus::New,
        };
        state.placed.push(order.clone());
        state.orders.insert(order_id, handle.clone());
        Ok(handle)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: i64) -> Result<bool, ApiError> {
        let mut state = self.state.lock().await;
        if let Some((executed, avg_price)) = state.fill_before_cancel.take() {
            if let Some(order) = state.orders.get_mut(&order_id) {
                if matches!(order.status, OrderStatus::New | OrderStatus::PartiallyFilled) {
                    order.executed_quantity = executed;
                    order.avg_price = avg_price;
                    order.status = if executed >= order.quantity {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                }
            }
        }
        if state.fail_cancels || state.forgotten.contains(&order_id) {
            return Ok(false);
        }
        match state.orders.get_mut(&order_id) {
            Some(order)
                if matches!(
                    order.status,
                    OrderStatus::New | OrderStatus::PartiallyFilled
                ) =>
            {
                order.status = OrderStatus::Canceled;
                state.cancelled.push(order_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_order(&self, _symbol: &str, order_id: i64) -> Result<OrderHandle, ApiError> {
        let state = self.state.lock().await;
        if state.fail_queries {
            return Err(rejection(
                -1001,
                "Internal error; unable to process your request. Please try again.",
            ));
        }
        if state.forgotten.contains(&order_id) {
            return Err(ApiError::OrderNotFound(order_id));
        }
        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(ApiError::OrderNotFound(order_id))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderHandle>, ApiError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .filter(|o| !state.forgotten.contains(&o.order_id))
            .cloned()
            .collect())
    }

    async fn get_symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters, ApiError> {
        Ok(self.state.lock().await.filters)
    }

    async fn get_last_price(&self, _symbol: &str) -> Result<Decimal, ApiError> {
        Ok(self.state.lock().await.last_price)
    }

    async fn get_account_balance(&self) -> Result<Vec<BalanceResponse>, ApiError> {
        Ok(self.state.lock().await.balances.clone())
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionResponse>, ApiError> {
        Ok(self.state.lock().await.positions.clone())
    }
}
