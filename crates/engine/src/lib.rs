//! # Engine Crate
//!
//! The live trading loop for one symbol and interval.
//!
//! ## Architectural Principles
//!
//! - **Single Writer:** One consumer task owns the `OrderLifecycleManager`
//!   and with it the `PositionState`. Everybody else sees snapshots through a
//!   `watch` channel and notifications through a `broadcast` channel.
//! - **Exchange Is Authoritative:** Order state is only ever taken from the
//!   gateway. At startup the position is rebuilt from the exchange rather than
//!   from anything stored locally.
//! - **Sequential Candles:** The stream task feeds klines over a channel; the
//!   consumer aligns, transforms and reconciles them strictly in order.
//!
//! ## Public API
//!
//! - `LiveEngine` / `EngineHandle`: start, stop and observe the engine.
//! - `OrderLifecycleManager`: the bracket-order state machine.
//! - `CandleAligner`, `CandlePipeline`: feed hygiene and HA transform.
//! - `StateReconciler`: startup rehydration.
//! - `load_history`: the backfill replay, also used by the `history` command.

use api_client::{ExchangeGateway, LiveConnector};
use configuration::Config;
use core_types::{Interval, Kline, PositionState};
use events::{CandleUpdate, EngineEvent};
use executor::{OrderExecutor, QuantitySizer, RetryPolicy};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub mod aligner;
pub mod backfill;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod reconciler;

pub use aligner::{CandleAligner, Rejection};
pub use backfill::{fetch_closed_klines, load_history, replay, HistoryRow};
pub use error::EngineError;
pub use lifecycle::OrderLifecycleManager;
pub use pipeline::CandlePipeline;
pub use reconciler::StateReconciler;

/// Klines buffered between the stream task and the consumer.
const KLINE_BUFFER: usize = 64;
/// Events kept for slow subscribers before they start lagging.
const EVENT_BUFFER: usize = 256;

/// Everything needed to trade one symbol, before it is started.
pub struct LiveEngine {
    symbol: String,
    interval: Interval,
    backfill_candles: u16,
    gateway: Arc<dyn ExchangeGateway>,
    connector: LiveConnector,
    pipeline: CandlePipeline,
    manager: OrderLifecycleManager,
    events: broadcast::Sender<EngineEvent>,
    position: watch::Sender<PositionState>,
    cancel: CancellationToken,
}

impl LiveEngine {
    pub fn new(config: &Config, gateway: Arc<dyn ExchangeGateway>, connector: LiveConnector) -> Self {
        let trading = &config.trading;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (position, _) = watch::channel(PositionState::default());

        let executor = OrderExecutor::new(
            gateway.clone(),
            QuantitySizer::new(trading.quantity.clone()),
            RetryPolicy::from(&config.orders),
        );
        let manager = OrderLifecycleManager::new(
            trading.symbol.clone(),
            trading.buy_offset,
            trading.sell_offset,
            executor,
            events.clone(),
        );

        Self {
            symbol: trading.symbol.clone(),
            interval: trading.interval,
            backfill_candles: config.backfill.candles,
            gateway,
            connector,
            pipeline: CandlePipeline::new(trading.interval),
            manager,
            events,
            position,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe before `start` to see the backfill and startup events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Replays history, adopts whatever is open on the exchange, then spawns
    /// the stream and consumer tasks.
    ///
    /// Backfill runs first, while the state is still FLAT, so historical
    /// candles can never touch adopted orders.
    pub async fn start(mut self) -> Result<EngineHandle, EngineError> {
        self.backfill().await?;

        let state = StateReconciler::new(self.gateway.clone())
            .rehydrate(&self.symbol)
            .await?;
        self.manager.restore(state);
        self.publish_state();

        let phase = self.manager.state().phase;
        info!(symbol = %self.symbol, interval = %self.interval, %phase, "Engine started");
        self.emit(EngineEvent::EngineStarted {
            symbol: self.symbol.clone(),
            interval: self.interval.to_string(),
            phase,
        });

        Ok(EngineHandle {
            cancel: self.cancel.clone(),
            position: self.position.subscribe(),
            events: self.events.clone(),
            task: tokio::spawn(self.run()),
        })
    }

    async fn backfill(&mut self) -> Result<(), EngineError> {
        let klines = fetch_closed_klines(
            self.gateway.as_ref(),
            &self.symbol,
            self.interval,
            self.backfill_candles,
        )
        .await?;
        let rows = replay(&mut self.pipeline, klines);

        for row in &rows {
            let phase = self.manager.on_candle(&row.candle, false).await;
            self.emit(EngineEvent::CandleClosed(CandleUpdate {
                symbol: self.symbol.clone(),
                candle: row.candle,
                signal: row.signal,
                phase,
                historical: true,
            }));
        }
        info!(
            symbol = %self.symbol,
            candles = rows.len(),
            display_long = self.pipeline.is_long(),
            "Backfill complete"
        );
        Ok(())
    }

    async fn run(mut self) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::channel(KLINE_BUFFER);
        let stream = {
            let connector = self.connector.clone();
            let symbol = self.symbol.clone();
            let interval = self.interval.to_string();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                connector
                    .subscribe_to_klines(&symbol, &interval, tx, cancel)
                    .await
            })
        };

        loop {
            let kline = tokio::select! {
                _ = self.cancel.cancelled() => break,
                kline = rx.recv() => match kline {
                    Some(kline) => kline,
                    // The stream task ended on its own.
                    None => break,
                },
            };
            self.on_kline(kline).await;
        }
        self.cancel.cancel();
        drop(rx);

        let outcome = match stream.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(symbol = %self.symbol, error = %e, "Kline stream failed permanently, external restart required");
                self.emit(EngineEvent::StreamFatal {
                    symbol: self.symbol.clone(),
                    reason: e.to_string(),
                });
                Err(EngineError::Stream(e))
            }
            Err(e) => Err(EngineError::Task(e.to_string())),
        };

        let phase = self.manager.state().phase;
        info!(symbol = %self.symbol, %phase, "Engine stopped");
        self.emit(EngineEvent::EngineStopped {
            symbol: self.symbol.clone(),
            phase,
        });
        outcome
    }

    async fn on_kline(&mut self, kline: Kline) {
        let Some((candle, signal)) = self.pipeline.process(kline) else {
            return;
        };
        let phase = self.manager.on_candle(&candle, true).await;
        info!(
            symbol = %self.symbol,
            open_time = %candle.open_time,
            ha_open = %candle.ha_open,
            ha_high = %candle.ha_high,
            ha_low = %candle.ha_low,
            ha_close = %candle.ha_close,
            %signal,
            %phase,
            "Candle processed"
        );
        self.publish_state();
        self.emit(EngineEvent::CandleClosed(CandleUpdate {
            symbol: self.symbol.clone(),
            candle,
            signal,
            phase,
            historical: false,
        }));
    }

    fn publish_state(&self) {
        self.position.send_replace(self.manager.state().clone());
    }

    fn emit(&self, event: EngineEvent) {
        debug!(kind = event.kind(), "Publishing engine event");
        let _ = self.events.send(event);
    }
}

/// Control surface of a running engine.
pub struct EngineHandle {
    cancel: CancellationToken,
    position: watch::Receiver<PositionState>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<Result<(), EngineError>>,
}

impl EngineHandle {
    /// Shuts the engine down and waits for the consumer loop to exit.
    pub async fn stop(self) -> Result<(), EngineError> {
        self.cancel.cancel();
        self.join().await
    }

    /// A token that stops the engine when cancelled, e.g. from a signal handler.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the current position state.
    pub fn position(&self) -> PositionState {
        self.position.borrow().clone()
    }

    pub fn watch_position(&self) -> watch::Receiver<PositionState> {
        self.position.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Waits for the engine to finish. A stream that gave up surfaces as
    /// `EngineError::Stream`.
    pub async fn join(self) -> Result<(), EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
    }
}
