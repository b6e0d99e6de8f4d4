use crate::error::AlerterError;
use configuration::TelegramConfig;
use core_types::TrendSignal;
use events::EngineEvent;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
pub mod error;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Fails with `NotConfigured` if the token or chat_id is missing, so the
    /// caller can simply run without alerts.
    pub fn new(config: &TelegramConfig) -> Result<Self, AlerterError> {
        Self::with_base_url(config, TELEGRAM_API_URL)
    }

    pub fn with_base_url(config: &TelegramConfig, base_url: &str) -> Result<Self, AlerterError> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            return Err(AlerterError::NotConfigured);
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    /// Sends a MarkdownV2 text message to the configured chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

/// A long-running service that forwards engine events to Telegram.
///
/// Ends when the engine drops its side of the channel.
pub async fn run_alerter_service(
    alerter: TelegramAlerter,
    mut event_rx: broadcast::Receiver<EngineEvent>,
) {
    tracing::info!("Alerter service started.");

    loop {
        match event_rx.recv().await {
            Ok(event) => {
                if let Some(msg) = format_event(&event) {
                    if let Err(e) = alerter.send_message(&msg).await {
                        tracing::error!(error = %e, kind = event.kind(), "Failed to send Telegram alert.");
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Alerter service lagged, skipped {} events.", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event channel closed. Alerter service shutting down.");
                break;
            }
        }
    }
}

/// Renders an event as a MarkdownV2 message, or `None` if it is not worth a
/// notification. Historical candles and HOLD candles stay quiet.
pub fn format_event(event: &EngineEvent) -> Option<String> {
    let text = match event {
        EngineEvent::EngineStarted {
            symbol,
            interval,
            phase,
        } => format!(
            "✅ *Engine started* {} {}\nPhase `{}`",
            escape_markdown(symbol),
            escape_markdown(interval),
            phase
        ),
        EngineEvent::CandleClosed(update) => {
            if update.historical || update.signal == TrendSignal::Hold {
                return None;
            }
            let icon = if update.signal == TrendSignal::Buy { "🟢" } else { "🔴" };
            format!(
                "{} *{}* {}\nHA O `{}` H `{}` L `{}` C `{}`",
                icon,
                update.signal,
                escape_markdown(&update.symbol),
                update.candle.ha_open,
                update.candle.ha_high,
                update.candle.ha_low,
                update.candle.ha_close
            )
        }
        EngineEvent::EntryPlaced(placed) => format!(
            "📝 *Entry stop placed* {}\n`{}` @ `{}`, trigger `{}`",
            escape_markdown(&placed.order.symbol),
            placed.order.quantity,
            placed.order.price,
            placed.order.stop_price
        ),
        EngineEvent::EntryFilled {
            symbol,
            price,
            quantity,
            ..
        } => format!(
            "📈 *LONG* {}\n`{}` filled @ `{}`",
            escape_markdown(symbol),
            quantity,
            price
        ),
        EngineEvent::StopPlaced(placed) => format!(
            "🛡 *Stop placed* {}\n`{}` @ `{}`",
            escape_markdown(&placed.order.symbol),
            placed.order.quantity,
            placed.order.stop_price
        ),
        EngineEvent::StopRepriced {
            symbol,
            previous_stop,
            order,
        } => format!(
            "↕️ *Stop trailed* {}\n`{}` → `{}`",
            escape_markdown(symbol),
            previous_stop,
            order.stop_price
        ),
        EngineEvent::OrderCanceled {
            symbol,
            order_id,
            side,
        } => format!(
            "✖️ *{} order canceled* {} \\#{}",
            side.as_str(),
            escape_markdown(symbol),
            order_id
        ),
        EngineEvent::OrderFailed {
            symbol,
            side,
            reason,
        } => format!(
            "⚠️ *{} order failed* {}\n{}",
            side.as_str(),
            escape_markdown(symbol),
            escape_markdown(reason)
        ),
        EngineEvent::PositionClosed(closed) => {
            let pnl = closed
                .pnl()
                .map(|p| format!("\nPnL `{}`", p.round_dp(4)))
                .unwrap_or_default();
            format!(
                "📉 *Position closed* {}\n`{}` @ `{}`{}",
                escape_markdown(&closed.symbol),
                closed.quantity,
                closed.exit_price,
                pnl
            )
        }
        EngineEvent::StreamFatal { symbol, reason } => format!(
            "🚨 *CRITICAL* {} stream lost, restart required\n{}",
            escape_markdown(symbol),
            escape_markdown(reason)
        ),
        EngineEvent::EngineStopped { symbol, phase } => format!(
            "⏹ *Engine stopped* {}\nPhase `{}`",
            escape_markdown(symbol),
            phase
        ),
    };
    Some(text)
}

/// Escapes characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    const SPECIAL: &str = r"\_*[]()~`>#+-=|{}.!";
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use core_types::{HaCandle, OrderSide, Phase};
    use events::{CandleUpdate, PositionClosed};
    use rust_decimal_macros::dec;

    fn update(signal: TrendSignal, historical: bool) -> EngineEvent {
        EngineEvent::CandleClosed(CandleUpdate {
            symbol: "ETHUSDT".to_string(),
            candle: HaCandle {
                open_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                ha_open: dec!(100),
                ha_high: dec!(101),
                ha_low: dec!(99),
                ha_close: dec!(100.5),
            },
            signal,
            phase: Phase::Flat,
            historical,
        })
    }

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("a_b-c.d"), r"a\_b\-c\.d");
        assert_eq!(escape_markdown(r"x\y"), r"x\\y");
        assert_eq!(escape_markdown("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn quiet_candles_are_skipped() {
        assert!(format_event(&update(TrendSignal::Hold, false)).is_none());
        assert!(format_event(&update(TrendSignal::Buy, true)).is_none());
        let msg = format_event(&update(TrendSignal::Buy, false)).unwrap();
        assert!(msg.contains("*BUY*"));
    }

    #[test]
    fn closed_position_reports_pnl() {
        let msg = format_event(&EngineEvent::PositionClosed(PositionClosed {
            symbol: "ETHUSDT".to_string(),
            entry_price: Some(dec!(100.10)),
            exit_price: dec!(98.00),
            quantity: dec!(0.5),
        }))
        .unwrap();
        assert!(msg.contains("PnL `-1.05"));
    }

    #[test]
    fn failures_are_escaped() {
        let msg = format_event(&EngineEvent::OrderFailed {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            reason: "Order would immediately trigger.".to_string(),
        })
        .unwrap();
        assert!(msg.contains(r"immediately trigger\."));
    }

    #[test]
    fn missing_credentials_disable_alerts() {
        let result = TelegramAlerter::new(&TelegramConfig::default());
        assert!(matches!(result, Err(AlerterError::NotConfigured)));
    }
}
