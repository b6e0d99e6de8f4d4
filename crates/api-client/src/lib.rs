use crate::auth::sign_request;
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use configuration::ApiKeys;
use core_types::{Kline, OrderHandle, OrderSide, StopOrderRequest, SymbolFilters};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

mod auth;
pub mod backoff;
pub mod error;
pub mod live_connector;
pub mod mock;
pub mod responses;

// --- Public API ---
pub use backoff::BackoffPolicy;
pub use live_connector::{parse_kline_message, LiveConnector};
pub use mock::MockExchange;
pub use responses::{ApiErrorResponse, BalanceResponse, OrderResponse, PositionResponse};

const MAINNET_REST_URL: &str = "https://fapi.binance.com";
const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: &str = "5000";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Binance: "Unknown order sent." (cancel of an order that is gone).
const CODE_CANCEL_REJECTED: i64 = -2011;
/// Binance: "Order does not exist."
const CODE_NO_SUCH_ORDER: i64 = -2013;

/// The exchange capabilities the trading engine depends on.
///
/// The engine only ever talks to the exchange through this trait, so the
/// production adapter and `MockExchange` are interchangeable.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Most recent `limit` candles, oldest first. The last one may still be open.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, ApiError>;

    /// Submits a stop-limit order. (Authenticated)
    async fn place_stop_order(&self, order: &StopOrderRequest) -> Result<OrderHandle, ApiError>;

    /// `Ok(true)` when the exchange cancelled the order, `Ok(false)` when it
    /// refused (already filled, already cancelled, unknown). (Authenticated)
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<bool, ApiError>;

    /// Current exchange view of an order. Unknown orders yield
    /// `ApiError::OrderNotFound`. (Authenticated)
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderHandle, ApiError>;

    /// Orders still working on the book for `symbol`. (Authenticated)
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderHandle>, ApiError>;

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ApiError>;

    async fn get_tick_size(&self, symbol: &str) -> Result<Decimal, ApiError> {
        Ok(self.get_symbol_filters(symbol).await?.tick_size)
    }

    async fn get_min_notional(&self, symbol: &str) -> Result<Decimal, ApiError> {
        Ok(self.get_symbol_filters(symbol).await?.min_notional)
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, ApiError>;

    /// Fetches the current account balance for all assets. (Authenticated)
    async fn get_account_balance(&self) -> Result<Vec<BalanceResponse>, ApiError>;

    /// Fetches all current positions, including empty ones. (Authenticated)
    async fn get_open_positions(&self) -> Result<Vec<PositionResponse>, ApiError>;
}

/// A concrete implementation of the `ExchangeGateway` for Binance USDⓈ-M futures.
#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
    hedge_mode: bool,
}

impl BinanceClient {
    pub fn new(testnet: bool, keys: &ApiKeys, hedge_mode: bool) -> Result<Self, ApiError> {
        let base_url = if testnet { TESTNET_REST_URL } else { MAINNET_REST_URL };
        Self::with_base_url(base_url, keys, hedge_mode)
    }

    pub fn with_base_url(
        base_url: &str,
        keys: &ApiKeys,
        hedge_mode: bool,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        // Public endpoints work without a key, so backfill-only runs can skip it.
        if !keys.key.is_empty() {
            let value = HeaderValue::from_str(&keys.key)
                .map_err(|e| ApiError::InvalidData(format!("Invalid API key: {}", e)))?;
            headers.insert("X-MBX-APIKEY", value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret: keys.secret.clone(),
            hedge_mode,
        })
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        params.insert("recvWindow", RECV_WINDOW_MS.to_string());
        params.insert("timestamp", Utc::now().timestamp_millis().to_string());

        let query_string = serde_qs::to_string(&params)
            .map_err(|e| ApiError::InvalidData(format!("Failed to encode query: {}", e)))?;
        let signature = sign_request(&self.api_secret, &query_string);

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );
        debug!(%method, path, "Sending signed request");

        let response = self.client.request(method, &url).send().await?;
        Self::decode(response).await
    }

    async fn send_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {}. Original text: {}",
                    e, text
                ))
            })?;
            Err(ApiError::Exchange {
                code: api_error.code,
                msg: api_error.msg,
            })
        }
    }

    fn position_side(&self) -> Option<&'static str> {
        self.hedge_mode.then_some("LONG")
    }
}

/// Binance expects plain decimal strings without trailing zeros.
fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

fn not_found(err: ApiError, order_id: i64) -> ApiError {
    match err {
        ApiError::Exchange { code, .. }
            if code == CODE_NO_SUCH_ORDER || code == CODE_CANCEL_REJECTED =>
        {
            ApiError::OrderNotFound(order_id)
        }
        other => other,
    }
}

// Intermediate struct for deserializing klines from Binance API
#[derive(Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

fn parse_decimal(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw).map_err(|e| ApiError::Deserialization(e.to_string()))
}

impl RawKline {
    fn into_kline(self, symbol: &str, interval: &str, now_ms: i64) -> Result<Kline, ApiError> {
        Ok(Kline {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            open_time: Utc
                .timestamp_millis_opt(self.0)
                .single()
                .ok_or_else(|| ApiError::InvalidData(format!("Invalid open_time: {}", self.0)))?,
            close_time: Utc
                .timestamp_millis_opt(self.6)
                .single()
                .ok_or_else(|| ApiError::InvalidData(format!("Invalid close_time: {}", self.6)))?,
            open: parse_decimal(&self.1)?,
            high: parse_decimal(&self.2)?,
            low: parse_decimal(&self.3)?,
            close: parse_decimal(&self.4)?,
            volume: parse_decimal(&self.5)?,
            // REST klines carry no closed flag; the current candle is still running.
            closed: self.6 < now_ms,
        })
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, ApiError> {
        let raw: Vec<RawKline> = self
            .send_public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let now_ms = Utc::now().timestamp_millis();
        raw.into_iter()
            .map(|k| k.into_kline(symbol, interval, now_ms))
            .collect()
    }

    async fn place_stop_order(&self, order: &StopOrderRequest) -> Result<OrderHandle, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", order.symbol.clone());
        params.insert("side", order.side.as_str().to_string());
        params.insert("type", "STOP".to_string());
        params.insert("timeInForce", "GTC".to_string());
        params.insert("quantity", fmt_decimal(order.quantity));
        params.insert("price", fmt_decimal(order.price));
        params.insert("stopPrice", fmt_decimal(order.stop_price));
        if let Some(side) = self.position_side() {
            params.insert("positionSide", side.to_string());
        }

        let response: OrderResponse = self
            .send_signed(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(response.into())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<bool, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());

        match self
            .send_signed::<OrderResponse>(Method::DELETE, "/fapi/v1/order", params)
            .await
        {
            Ok(_) => Ok(true),
            Err(ApiError::Exchange { code, msg }) => {
                warn!(order_id, code, %msg, "Exchange refused to cancel order");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderHandle, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());

        self.send_signed::<OrderResponse>(Method::GET, "/fapi/v1/order", params)
            .await
            .map(OrderHandle::from)
            .map_err(|e| not_found(e, order_id))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderHandle>, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());

        let orders: Vec<OrderResponse> = self
            .send_signed(Method::GET, "/fapi/v1/openOrders", params)
            .await?;
        Ok(orders.into_iter().map(OrderHandle::from).collect())
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ApiError> {
        let info: responses::ExchangeInfoResponse =
            self.send_public("/fapi/v1/exchangeInfo", &[]).await?;
        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ApiError::InvalidData(format!("Unknown symbol: {}", symbol)))?
            .to_filters()
            .ok_or_else(|| {
                ApiError::InvalidData(format!("Missing price or lot filter for {}", symbol))
            })
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let ticker: responses::TickerPriceResponse = self
            .send_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn get_account_balance(&self) -> Result<Vec<BalanceResponse>, ApiError> {
        self.send_signed(Method::GET, "/fapi/v2/balance", BTreeMap::new())
            .await
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionResponse>, ApiError> {
        self.send_signed(Method::GET, "/fapi/v2/positionRisk", BTreeMap::new())
            .await
    }
}
