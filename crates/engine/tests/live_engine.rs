use api_client::error::ApiError;
use api_client::{BackoffPolicy, LiveConnector, MockExchange, PositionResponse};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use configuration::{
    BackfillConfig, Config, ExchangeConfig, LoggingConfig, OrderConfig, QuantityConfig,
    StreamConfig, TelegramConfig, TradingConfig,
};
use core_types::{Kline, OrderStatus, Phase, SymbolFilters};
use engine::{EngineError, LiveEngine};
use events::EngineEvent;
use futures_util::SinkExt;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const START_MS: i64 = 1_709_294_400_000; // 2024-03-01T12:00:00Z
const FIVE_MINUTES_MS: i64 = 300_000;

fn config(backfill: u16) -> Config {
    Config {
        exchange: ExchangeConfig {
            testnet: true,
            hedge_mode: false,
            api: Default::default(),
        },
        trading: TradingConfig {
            symbol: "ETHUSDT".to_string(),
            interval: "5m".parse().unwrap(),
            buy_offset: dec!(0.1),
            sell_offset: dec!(0.1),
            quantity: QuantityConfig::Fixed { quantity: dec!(0.5) },
        },
        stream: StreamConfig {
            max_retries: 1,
            initial_backoff_secs: 0.01,
            backoff_factor: 1.5,
            max_backoff_secs: 0.05,
        },
        orders: OrderConfig {
            status_poll_attempts: 1,
            status_poll_delay_ms: 1,
        },
        backfill: BackfillConfig { candles: backfill },
        telegram: TelegramConfig::default(),
        logging: LoggingConfig::default(),
    }
}

fn history_kline(index: i64) -> Kline {
    let open_time = Utc.timestamp_millis_opt(START_MS).unwrap() + ChronoDuration::minutes(5 * index);
    Kline {
        symbol: "ETHUSDT".to_string(),
        interval: "5m".to_string(),
        open_time,
        close_time: open_time + ChronoDuration::milliseconds(299_999),
        open: dec!(100),
        high: dec!(101),
        low: dec!(99.5),
        close: dec!(100.5),
        volume: dec!(10),
        closed: true,
    }
}

fn stream_frame(index: i64) -> String {
    let open_ms = START_MS + index * FIVE_MINUTES_MS;
    format!(
        r#"{{"e":"kline","E":{e},"s":"ETHUSDT","k":{{"t":{t},"T":{tc},"s":"ETHUSDT","i":"5m","o":"100.0","c":"100.5","h":"101.0","l":"99.5","v":"10","x":true}}}}"#,
        e = open_ms + FIVE_MINUTES_MS,
        t = open_ms,
        tc = open_ms + FIVE_MINUTES_MS - 1,
    )
}

fn mock() -> Arc<MockExchange> {
    Arc::new(MockExchange::new(SymbolFilters {
        tick_size: dec!(0.01),
        step_size: dec!(0.001),
        min_notional: dec!(5),
    }))
}

fn policy(config: &Config) -> BackoffPolicy {
    BackoffPolicy::from(&config.stream)
}

/// A one-connection stream server; frames are pushed by the test.
async fn spawn_server() -> (String, mpsc::UnboundedSender<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        while let Some(frame) = rx.recv().await {
            if ws.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        std::future::pending::<()>().await;
    });
    (format!("ws://{}/ws", addr), tx)
}

async fn wait_for<F>(events: &mut broadcast::Receiver<EngineEvent>, mut predicate: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not published in time")
}

fn live_candle(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::CandleClosed(update) if !update.historical)
}

#[tokio::test]
async fn trades_a_bracket_from_the_live_stream() {
    let mock = mock();
    mock.set_klines((0..3).map(history_kline).collect()).await;
    mock.set_last_price(dec!(90)).await;

    let (url, frames) = spawn_server().await;
    let config = config(3);
    let connector = LiveConnector::with_base_url(&url, policy(&config)).unwrap();
    let engine = LiveEngine::new(&config, mock.clone(), connector);
    let mut events = engine.subscribe();
    let handle = engine.start().await.unwrap();

    // Backfill is replayed without trading.
    let mut historical = 0;
    loop {
        match wait_for(&mut events, |_| true).await {
            EngineEvent::CandleClosed(update) => {
                assert!(update.historical);
                assert_eq!(update.phase, Phase::Flat);
                historical += 1;
            }
            EngineEvent::EngineStarted { phase, .. } => {
                assert_eq!(phase, Phase::Flat);
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(historical, 3);
    assert!(mock.placed_orders().await.is_empty());

    // A live copy of the last historical candle is dropped; the next one trades.
    frames.send(stream_frame(2)).unwrap();
    frames.send(stream_frame(3)).unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::EntryPlaced(_))).await;
    wait_for(&mut events, live_candle).await;
    assert_eq!(handle.position().phase, Phase::EntryPending);
    let entry = handle.position().active_entry_order.unwrap();

    mock.fill_order(entry.order_id, entry.price).await;
    mock.set_last_price(dec!(101)).await;
    frames.send(stream_frame(4)).unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::StopPlaced(_))).await;
    wait_for(&mut events, live_candle).await;

    let state = handle.position();
    assert_eq!(state.phase, Phase::ExitPending);
    assert_eq!(state.entry_fill_price, Some(entry.price));
    assert_eq!(state.position_quantity, Some(dec!(0.5)));
    let stop = state.active_exit_order.unwrap();
    assert!(stop.stop_price < dec!(101));
    assert_eq!(
        mock.order(entry.order_id).await.unwrap().status,
        OrderStatus::Filled
    );

    // `stop` returns only after the loop has exited and said so.
    handle.stop().await.unwrap();
    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::EngineStopped { phase, .. } = event {
            stopped = Some(phase);
        }
    }
    assert_eq!(stopped, Some(Phase::ExitPending));
}

#[tokio::test]
async fn exhausted_stream_stops_the_engine() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config(0);
    let connector =
        LiveConnector::with_base_url(&format!("ws://{}/ws", addr), policy(&config)).unwrap();
    let engine = LiveEngine::new(&config, mock(), connector);
    let mut events = engine.subscribe();
    let handle = engine.start().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(EngineError::Stream(ApiError::ReconnectExhausted(1)))
    ));
    wait_for(&mut events, |e| matches!(e, EngineEvent::StreamFatal { .. })).await;
    wait_for(&mut events, |e| matches!(e, EngineEvent::EngineStopped { .. })).await;
}

#[tokio::test]
async fn refuses_to_start_on_a_short_position() {
    let mock = mock();
    mock.set_positions(vec![PositionResponse {
        symbol: "ETHUSDT".to_string(),
        position_amt: dec!(-0.5),
        entry_price: dec!(100),
        position_side: None,
    }])
    .await;

    let config = config(0);
    let connector = LiveConnector::with_base_url("ws://127.0.0.1:9/ws", policy(&config)).unwrap();
    let result = LiveEngine::new(&config, mock, connector).start().await;
    assert!(matches!(
        result,
        Err(EngineError::ShortPosition { amount, .. }) if amount == dec!(-0.5)
    ));
}
