use crate::backoff::BackoffPolicy;
use crate::error::ApiError;
use chrono::{DateTime, TimeZone, Utc};
use core_types::Kline;
use futures_util::stream::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

const MAINNET_WS_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/ws";

// --- WebSocket Deserialization Structs ---

/// Combined-stream envelope (`/stream?streams=...`).
#[derive(Debug, Deserialize)]
struct WsStreamWrapper<T> {
    #[allow(dead_code)]
    stream: String,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WsFrame {
    Combined(WsStreamWrapper<WsKlineEvent>),
    Raw(WsKlineEvent),
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ApiError::InvalidData(format!("Invalid timestamp: {}", ms)))
}

/// Parses one text frame of a kline stream.
///
/// Returns `Ok(None)` for well-formed events that are not klines. Both the raw
/// (`/ws/<stream>`) and the combined (`/stream?streams=`) framings are accepted.
pub fn parse_kline_message(text: &str) -> Result<Option<Kline>, ApiError> {
    let frame: WsFrame =
        serde_json::from_str(text).map_err(|e| ApiError::Deserialization(e.to_string()))?;
    let event = match frame {
        WsFrame::Combined(wrapper) => wrapper.data,
        WsFrame::Raw(event) => event,
    };
    if event.event_type != "kline" {
        return Ok(None);
    }
    let k = event.kline;
    Ok(Some(Kline {
        symbol: event.symbol,
        interval: k.interval,
        open_time: millis_to_utc(k.open_time)?,
        close_time: millis_to_utc(k.close_time)?,
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        closed: k.is_closed,
    }))
}

/// Maintains the kline WebSocket subscription for one symbol and interval.
#[derive(Debug, Clone)]
pub struct LiveConnector {
    base_url: Url,
    backoff: BackoffPolicy,
}

impl LiveConnector {
    pub fn new(testnet: bool, backoff: BackoffPolicy) -> Result<Self, ApiError> {
        let base_url = if testnet { TESTNET_WS_URL } else { MAINNET_WS_URL };
        Self::with_base_url(base_url, backoff)
    }

    /// Points the connector at an arbitrary raw-stream endpoint (e.g. a local relay).
    pub fn with_base_url(base_url: &str, backoff: BackoffPolicy) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidData(format!("Invalid WebSocket URL {base_url}: {e}")))?;
        Ok(Self { base_url, backoff })
    }

    /// `{base}/{symbol_lowercase}@kline_{interval}`.
    pub fn stream_url(&self, symbol: &str, interval: &str) -> Result<Url, ApiError> {
        let raw = format!(
            "{}/{}@kline_{}",
            self.base_url.as_str().trim_end_matches('/'),
            symbol.to_lowercase(),
            interval
        );
        Url::parse(&raw).map_err(|e| ApiError::InvalidData(format!("Invalid stream URL {raw}: {e}")))
    }

    /// Streams closed klines into `tx` until cancelled.
    ///
    /// Any disconnect, clean or not, is followed by an exponential backoff
    /// sleep. The attempt counter resets once a connection is established, and
    /// `ReconnectExhausted` is returned after `max_retries` consecutive failures.
    /// Cancellation, or the receiver being dropped, ends the loop with `Ok(())`.
    pub async fn subscribe_to_klines(
        &self,
        symbol: &str,
        interval: &str,
        tx: mpsc::Sender<Kline>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let url = self.stream_url(symbol, interval)?;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            info!(%url, "Connecting to kline stream...");
            let connection = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = connect_async(url.as_str()) => result,
            };

            match connection {
                Ok((mut stream, _)) => {
                    info!(symbol, interval, "Kline stream connected.");
                    attempt = 0;

                    loop {
                        let msg = tokio::select! {
                            _ = cancel.cancelled() => {
                                let _ = stream.close(None).await;
                                return Ok(());
                            }
                            msg = stream.next() => msg,
                        };

                        match msg {
                            Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                                Ok(Some(kline)) if kline.closed => {
                                    debug!(symbol = %kline.symbol, open_time = %kline.open_time, "Closed kline received.");
                                    if tx.send(kline).await.is_err() {
                                        info!("Kline receiver dropped. Closing WebSocket connection.");
                                        let _ = stream.close(None).await;
                                        return Ok(());
                                    }
                                }
                                // In-progress klines and other events are skipped silently.
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "Ignoring unparseable stream message."),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                debug!("Received ping with {} bytes", data.len());
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "WebSocket connection closed by the server.");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(error = %e, "WebSocket message error.");
                                break;
                            }
                            None => {
                                warn!("WebSocket stream ended.");
                                break;
                            }
                        }

                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connection error.");
                }
            }

            attempt += 1;
            if attempt > self.backoff.max_retries {
                error!(
                    max_retries = self.backoff.max_retries,
                    "Kline stream reconnect attempts exhausted."
                );
                return Err(ApiError::ReconnectExhausted(self.backoff.max_retries));
            }

            let delay = self.backoff.delay_for(attempt);
            warn!(
                attempt,
                max_retries = self.backoff.max_retries,
                delay_secs = delay.as_secs_f64(),
                "Kline stream disconnected. Reconnect attempt {}/{}",
                attempt,
                self.backoff.max_retries
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
