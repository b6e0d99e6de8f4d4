use api_client::error::ApiError;
use api_client::{BackoffPolicy, LiveConnector};
use futures_util::SinkExt;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

fn kline_frame(open_ms: i64, close: &str, closed: bool) -> String {
    format!(
        r#"{{"e":"kline","E":{e},"s":"ETHUSDT","k":{{"t":{t},"T":{tc},"s":"ETHUSDT","i":"5m","o":"100.0","c":"{c}","h":"101.0","l":"99.0","v":"10","x":{x}}}}}"#,
        e = open_ms + 1,
        t = open_ms,
        tc = open_ms + 299_999,
        c = close,
        x = closed
    )
}

fn fast_policy(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        initial_delay: Duration::from_millis(20),
        factor: 1.5,
        max_delay: Duration::from_millis(100),
    }
}

/// Serves `sessions` connections in order, each sending its frames then closing.
async fn spawn_server(sessions: Vec<Vec<String>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for frames in sessions {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }
            let _ = ws.close(None).await;
        }
        // Keep the listener alive so later reconnects hang instead of failing.
        std::future::pending::<()>().await;
    });
    format!("ws://{}/ws", addr)
}

#[tokio::test]
async fn forwards_only_closed_klines_and_reconnects_after_close() {
    let base = spawn_server(vec![
        vec![
            kline_frame(1_709_294_400_000, "100.5", false),
            kline_frame(1_709_294_400_000, "100.7", true),
        ],
        vec![kline_frame(1_709_294_700_000, "101.2", true)],
    ])
    .await;

    let connector = LiveConnector::with_base_url(&base, fast_policy(3)).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            connector
                .subscribe_to_klines("ETHUSDT", "5m", tx, cancel)
                .await
        })
    };

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.closed);
    assert_eq!(first.close.to_string(), "100.7");

    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.open_time.timestamp_millis(), 1_709_294_700_000);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn successful_connections_reset_the_retry_budget() {
    // Three sessions that each close cleanly: with a budget of one retry,
    // only a reset after every successful connection keeps the stream alive.
    let base = spawn_server(vec![
        vec![kline_frame(1_709_294_400_000, "100.1", true)],
        vec![kline_frame(1_709_294_700_000, "100.2", true)],
        vec![kline_frame(1_709_295_000_000, "100.3", true)],
    ])
    .await;

    let connector = LiveConnector::with_base_url(&base, fast_policy(1)).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            connector
                .subscribe_to_klines("ETHUSDT", "5m", tx, cancel)
                .await
        })
    };

    let mut closes = Vec::new();
    for _ in 0..3 {
        let kline = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        closes.push(kline.close.to_string());
    }
    assert_eq!(closes, vec!["100.1", "100.2", "100.3"]);

    // The fourth connection hangs in the handshake; the stream has not given up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector =
        LiveConnector::with_base_url(&format!("ws://{}/ws", addr), fast_policy(2)).unwrap();
    let (tx, _rx) = mpsc::channel(1);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connector.subscribe_to_klines("ETHUSDT", "5m", tx, CancellationToken::new()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(ApiError::ReconnectExhausted(2))));
}

#[tokio::test]
async fn cancellation_interrupts_the_backoff_sleep() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let policy = BackoffPolicy {
        max_retries: 5,
        initial_delay: Duration::from_secs(60),
        factor: 1.5,
        max_delay: Duration::from_secs(60),
    };
    let connector = LiveConnector::with_base_url(&format!("ws://{}/ws", addr), policy).unwrap();
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connector.subscribe_to_klines("ETHUSDT", "5m", tx, cancel),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn exits_cleanly_when_the_receiver_is_dropped() {
    let base = spawn_server(vec![vec![
        kline_frame(1_709_294_400_000, "100.7", true),
        kline_frame(1_709_294_700_000, "100.9", true),
    ]])
    .await;

    let connector = LiveConnector::with_base_url(&base, fast_policy(3)).unwrap();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connector.subscribe_to_klines("ETHUSDT", "5m", tx, CancellationToken::new()),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}
