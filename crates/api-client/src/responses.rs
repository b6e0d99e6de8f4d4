use core_types::{OrderHandle, OrderSide, OrderStatus, SymbolFilters};
use rust_decimal::Decimal;
use serde::Deserialize;

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// An order as returned by `POST`, `GET` and `DELETE /fapi/v1/order` and by
/// `GET /fapi/v1/openOrders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub stop_price: Decimal,
    #[serde(default)]
    pub orig_qty: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(rename = "type", default)]
    pub order_type: String,
    // There are more fields, but these are the ones the engine reconciles on.
}

impl From<OrderResponse> for OrderHandle {
    fn from(r: OrderResponse) -> Self {
        OrderHandle {
            order_id: r.order_id,
            symbol: r.symbol,
            side: r.side,
            price: r.price,
            stop_price: r.stop_price,
            quantity: r.orig_qty,
            executed_quantity: r.executed_qty,
            avg_price: r.avg_price,
            status: r.status,
        }
    }
}

/// `GET /fapi/v1/exchangeInfo`, reduced to the per-symbol filters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

impl SymbolInfo {
    /// Collapses the filter list into the three values the engine needs.
    ///
    /// Returns `None` when the exchange did not publish a price or lot filter.
    pub fn to_filters(&self) -> Option<SymbolFilters> {
        let mut tick_size = None;
        let mut step_size = None;
        let mut min_notional = Decimal::ZERO;
        for filter in &self.filters {
            match filter {
                SymbolFilter::Price { tick_size: t } => tick_size = Some(*t),
                SymbolFilter::LotSize { step_size: s } => step_size = Some(*s),
                SymbolFilter::MinNotional { notional } => min_notional = *notional,
                SymbolFilter::Other => {}
            }
        }
        Some(SymbolFilters {
            tick_size: tick_size?,
            step_size: step_size?,
            min_notional,
        })
    }
}

/// `GET /fapi/v1/ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: Decimal,
}

/// A single asset's balance from `GET /fapi/v2/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub asset: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
}

/// A single position from `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub symbol: String,
    /// Signed: positive for long, negative for short.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub position_side: Option<String>,
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
