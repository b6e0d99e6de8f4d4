use chrono::{DateTime, Utc};
use core_types::{HaCandle, OrderHandle, OrderSide, OrderStatus, Phase, PositionState, StopOrderRequest};
use events::{EngineEvent, OrderPlaced, PositionClosed};
use executor::{floor_to_tick, ExecutorError, OrderExecutor, OrderLookup};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How far a candle got through reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Carry on with the JUST_CLOSED collapse and issuance.
    Continue,
    /// Leave everything as is until the next candle.
    Hold,
    /// A fill was handled; the candle is finished.
    Done,
}

fn is_gone(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
    )
}

/// An order created on an earlier candle (or adopted at startup) is stale.
fn created_before(created: Option<DateTime<Utc>>, candle: &HaCandle) -> bool {
    created.is_none_or(|t| candle.open_time > t)
}

/// The long-only bracket state machine:
/// `FLAT → ENTRY_PENDING → LONG → EXIT_PENDING → JUST_CLOSED → FLAT`.
///
/// It is the only writer of `PositionState`. Each closed HA candle first
/// reconciles the order belonging to the current phase against the exchange,
/// then collapses `JUST_CLOSED`, then (when trading is allowed) issues the
/// entry stop or the trailing exit stop.
pub struct OrderLifecycleManager {
    symbol: String,
    buy_offset: Decimal,
    sell_offset: Decimal,
    executor: OrderExecutor,
    state: PositionState,
    events: broadcast::Sender<EngineEvent>,
}

impl OrderLifecycleManager {
    pub fn new(
        symbol: impl Into<String>,
        buy_offset: Decimal,
        sell_offset: Decimal,
        executor: OrderExecutor,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            buy_offset,
            sell_offset,
            executor,
            state: PositionState::default(),
            events,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    /// Replaces the state wholesale, e.g. with one rebuilt from the exchange.
    pub fn restore(&mut self, state: PositionState) {
        info!(symbol = %self.symbol, phase = %state.phase, "Position state restored");
        self.state = state;
    }

    /// Runs one closed HA candle through the state machine and returns the
    /// resulting phase. Exchange failures are logged and reported as events;
    /// they never abort the engine.
    pub async fn on_candle(&mut self, candle: &HaCandle, allow_trading: bool) -> Phase {
        let started = self.state.phase;
        let mut trail_from = None;

        let step = match started {
            Phase::EntryPending => self.reconcile_entry(candle, allow_trading).await,
            Phase::ExitPending => self.reconcile_exit(candle, &mut trail_from).await,
            _ => Step::Continue,
        };
        if step != Step::Continue {
            return self.state.phase;
        }

        if started == Phase::JustClosed {
            self.state.phase = Phase::Flat;
            debug!(symbol = %self.symbol, "JUST_CLOSED collapsed to FLAT");
        }

        if allow_trading {
            match self.state.phase {
                Phase::Flat if self.state.active_entry_order.is_none() => {
                    self.issue_entry(candle).await
                }
                Phase::Long if self.state.active_exit_order.is_none() => {
                    self.issue_exit(candle, trail_from).await
                }
                _ => {}
            }
        }

        self.state.phase
    }

    // --- Reconciliation -------------------------------------------------

    async fn reconcile_entry(&mut self, candle: &HaCandle, allow_trading: bool) -> Step {
        let Some(order) = self.state.active_entry_order.clone() else {
            warn!(symbol = %self.symbol, "ENTRY_PENDING without an entry order, resetting to FLAT");
            self.state.phase = Phase::Flat;
            return Step::Continue;
        };

        let lookup = match self.executor.settle(&self.symbol, order.order_id).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, error = %e, "Entry status query failed, retrying next candle");
                return Step::Hold;
            }
        };

        match lookup {
            OrderLookup::Found(o) if o.status == OrderStatus::Filled => {
                self.entry_filled(o, candle, allow_trading).await
            }
            OrderLookup::Found(o)
                if matches!(o.status, OrderStatus::PartiallyFilled | OrderStatus::PendingCancel) =>
            {
                info!(symbol = %self.symbol, order_id = o.order_id, status = %o.status, executed = %o.executed_quantity, "Entry order in flight, leaving it in place");
                self.state.active_entry_order = Some(o);
                Step::Hold
            }
            OrderLookup::Found(o) if o.status == OrderStatus::New => {
                if !created_before(self.state.entry_candle_time, candle) {
                    self.state.active_entry_order = Some(o);
                    return Step::Continue;
                }
                self.cancel_entry(o, candle, allow_trading).await
            }
            gone => self.entry_gone(gone, candle, allow_trading).await,
        }
    }

    async fn cancel_entry(&mut self, order: OrderHandle, candle: &HaCandle, allow_trading: bool) -> Step {
        let cancelled = self.request_cancel(&order).await;

        // Never issue a replacement until the exchange says the old one is
        // gone, and take whatever executed before the cancel landed.
        match self.executor.lookup(&self.symbol, order.order_id).await {
            Ok(OrderLookup::Found(o)) if o.status == OrderStatus::Filled => {
                self.entry_filled(o, candle, allow_trading).await
            }
            Ok(lookup) if is_gone(lookup.status()) => {
                if cancelled && lookup.executed_quantity().is_zero() {
                    self.clear_entry();
                    self.emit(EngineEvent::OrderCanceled {
                        symbol: self.symbol.clone(),
                        order_id: order.order_id,
                        side: OrderSide::Buy,
                    });
                    return Step::Continue;
                }
                self.entry_gone(lookup, candle, allow_trading).await
            }
            Ok(OrderLookup::Found(o)) => {
                self.state.active_entry_order = Some(o);
                Step::Hold
            }
            Ok(OrderLookup::NotFound) => Step::Hold,
            Err(e) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, error = %e, "Entry re-query failed, keeping order");
                Step::Hold
            }
        }
    }

    async fn entry_gone(&mut self, lookup: OrderLookup, candle: &HaCandle, allow_trading: bool) -> Step {
        match lookup {
            // A partial fill that was then cancelled or expired still opened a position.
            OrderLookup::Found(o) if o.executed_quantity > Decimal::ZERO => {
                self.entry_filled(o, candle, allow_trading).await
            }
            lookup => {
                info!(symbol = %self.symbol, status = %lookup.status(), "Entry order no longer working, back to FLAT");
                self.clear_entry();
                Step::Continue
            }
        }
    }

    async fn entry_filled(&mut self, order: OrderHandle, candle: &HaCandle, allow_trading: bool) -> Step {
        let price = order.fill_price();
        let quantity = if order.executed_quantity > Decimal::ZERO {
            order.executed_quantity
        } else {
            order.quantity
        };

        self.state.phase = Phase::Long;
        self.state.active_entry_order = None;
        self.state.entry_candle_time = None;
        self.state.entry_fill_price = Some(price);
        self.state.position_quantity = Some(quantity);
        info!(symbol = %self.symbol, order_id = order.order_id, %price, %quantity, "Entry filled, position LONG");
        self.emit(EngineEvent::EntryFilled {
            symbol: self.symbol.clone(),
            order_id: order.order_id,
            price,
            quantity,
        });

        if allow_trading {
            self.issue_exit(candle, None).await;
        }
        Step::Done
    }

    async fn reconcile_exit(&mut self, candle: &HaCandle, trail_from: &mut Option<Decimal>) -> Step {
        let Some(order) = self.state.active_exit_order.clone() else {
            warn!(symbol = %self.symbol, "EXIT_PENDING without an exit order, back to LONG");
            self.state.phase = Phase::Long;
            return Step::Continue;
        };

        let lookup = match self.executor.settle(&self.symbol, order.order_id).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, error = %e, "Exit status query failed, retrying next candle");
                return Step::Hold;
            }
        };

        match lookup {
            OrderLookup::Found(o) if o.status == OrderStatus::Filled => self.exit_filled(o),
            OrderLookup::Found(o)
                if matches!(o.status, OrderStatus::PartiallyFilled | OrderStatus::PendingCancel) =>
            {
                info!(symbol = %self.symbol, order_id = o.order_id, status = %o.status, executed = %o.executed_quantity, "Exit order in flight, leaving it in place");
                self.state.active_exit_order = Some(o);
                Step::Hold
            }
            OrderLookup::Found(o) if o.status == OrderStatus::New => {
                if !created_before(self.state.exit_candle_time, candle) {
                    self.state.active_exit_order = Some(o);
                    return Step::Continue;
                }
                self.cancel_exit(o, trail_from).await
            }
            gone => self.exit_gone(gone),
        }
    }

    /// Pulls the trailing stop so it can be re-issued at the new candle's low.
    async fn cancel_exit(&mut self, order: OrderHandle, trail_from: &mut Option<Decimal>) -> Step {
        let cancelled = self.request_cancel(&order).await;

        match self.executor.lookup(&self.symbol, order.order_id).await {
            Ok(OrderLookup::Found(o)) if o.status == OrderStatus::Filled => self.exit_filled(o),
            Ok(lookup) if is_gone(lookup.status()) => {
                if cancelled && lookup.executed_quantity().is_zero() {
                    debug!(symbol = %self.symbol, order_id = order.order_id, stop = %order.stop_price, "Trailing stop pulled for re-pricing");
                    self.clear_exit();
                    *trail_from = Some(order.stop_price);
                    return Step::Continue;
                }
                let step = self.exit_gone(lookup);
                if cancelled && step == Step::Continue {
                    *trail_from = Some(order.stop_price);
                }
                step
            }
            Ok(OrderLookup::Found(o)) => {
                self.state.active_exit_order = Some(o);
                Step::Hold
            }
            Ok(OrderLookup::NotFound) => Step::Hold,
            Err(e) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, error = %e, "Stop re-query failed, keeping order");
                Step::Hold
            }
        }
    }

    /// `true` only when the exchange confirmed the cancel. Either way the
    /// caller re-queries the order before acting.
    async fn request_cancel(&self, order: &OrderHandle) -> bool {
        let side = order.side.as_str();
        match self.executor.cancel(&self.symbol, order.order_id).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, side, "Cancel refused, re-querying");
                false
            }
            Err(e) => {
                warn!(symbol = %self.symbol, order_id = order.order_id, side, error = %e, "Cancel failed, re-querying");
                false
            }
        }
    }

    fn exit_gone(&mut self, lookup: OrderLookup) -> Step {
        let held = self.state.position_quantity.unwrap_or(Decimal::ZERO);
        if let OrderLookup::Found(o) = &lookup {
            if o.executed_quantity > Decimal::ZERO {
                let remaining = held - o.executed_quantity;
                if remaining <= Decimal::ZERO {
                    return self.exit_filled(o.clone());
                }
                warn!(symbol = %self.symbol, order_id = o.order_id, %remaining, "Stop partially executed before it ended");
                self.state.position_quantity = Some(remaining);
            }
        }
        info!(symbol = %self.symbol, status = %lookup.status(), "Stop no longer working, back to LONG");
        self.clear_exit();
        Step::Continue
    }

    fn exit_filled(&mut self, order: OrderHandle) -> Step {
        let exit_price = order.fill_price();
        let quantity = self
            .state
            .position_quantity
            .unwrap_or(order.executed_quantity);
        let closed = PositionClosed {
            symbol: self.symbol.clone(),
            entry_price: self.state.entry_fill_price,
            exit_price,
            quantity,
        };
        info!(
            symbol = %self.symbol,
            order_id = order.order_id,
            %exit_price,
            pnl = ?closed.pnl(),
            "Stop filled, position closed"
        );

        self.state = PositionState {
            phase: Phase::JustClosed,
            last_exit_price: Some(exit_price),
            ..PositionState::default()
        };
        self.emit(EngineEvent::PositionClosed(closed));
        Step::Done
    }

    fn clear_entry(&mut self) {
        self.state.active_entry_order = None;
        self.state.entry_candle_time = None;
        self.state.phase = Phase::Flat;
    }

    fn clear_exit(&mut self) {
        self.state.active_exit_order = None;
        self.state.exit_candle_time = None;
        self.state.phase = Phase::Long;
    }

    // --- Issuance -------------------------------------------------------

    async fn issue_entry(&mut self, candle: &HaCandle) {
        let filters = match self.executor.filters(&self.symbol).await {
            Ok(filters) => filters,
            Err(e) => return self.order_failed(OrderSide::Buy, e),
        };
        let trigger = floor_to_tick(candle.ha_high, filters.tick_size);
        let price = floor_to_tick(candle.ha_high + self.buy_offset, filters.tick_size);

        let last_price = match self.executor.last_price(&self.symbol).await {
            Ok(last) => last,
            Err(e) => return self.order_failed(OrderSide::Buy, e),
        };
        if last_price >= trigger {
            info!(symbol = %self.symbol, %last_price, %trigger, "Last price at or above entry trigger, no entry this candle");
            return;
        }

        let quantity = match self.executor.entry_quantity(price).await {
            Ok(quantity) => quantity,
            Err(e) => return self.order_failed(OrderSide::Buy, e),
        };
        let request = StopOrderRequest {
            symbol: self.symbol.clone(),
            side: OrderSide::Buy,
            price,
            stop_price: trigger,
            quantity,
        };

        match self.executor.place_stop(request).await {
            Ok(order) => {
                self.state.phase = Phase::EntryPending;
                self.state.active_entry_order = Some(order.clone());
                self.state.entry_candle_time = Some(candle.open_time);
                self.emit(EngineEvent::EntryPlaced(OrderPlaced {
                    order,
                    candle_time: Some(candle.open_time),
                }));
            }
            Err(e) => self.order_failed(OrderSide::Buy, e),
        }
    }

    async fn issue_exit(&mut self, candle: &HaCandle, trail_from: Option<Decimal>) {
        let Some(quantity) = self.state.position_quantity.filter(|q| *q > Decimal::ZERO) else {
            error!(symbol = %self.symbol, "LONG without a filled quantity, cannot place stop");
            return;
        };
        let filters = match self.executor.filters(&self.symbol).await {
            Ok(filters) => filters,
            Err(e) => return self.order_failed(OrderSide::Sell, e),
        };
        let trigger = floor_to_tick(candle.ha_low - self.sell_offset, filters.tick_size);
        if trigger <= Decimal::ZERO {
            warn!(symbol = %self.symbol, %trigger, "Stop trigger not positive, skipping");
            return;
        }

        let request = StopOrderRequest {
            symbol: self.symbol.clone(),
            side: OrderSide::Sell,
            price: trigger,
            stop_price: trigger,
            quantity,
        };

        match self.executor.place_stop(request).await {
            Ok(order) => {
                self.state.phase = Phase::ExitPending;
                self.state.active_exit_order = Some(order.clone());
                self.state.exit_candle_time = Some(candle.open_time);
                let event = match trail_from {
                    Some(previous_stop) => EngineEvent::StopRepriced {
                        symbol: self.symbol.clone(),
                        previous_stop,
                        order,
                    },
                    None => EngineEvent::StopPlaced(OrderPlaced {
                        order,
                        candle_time: Some(candle.open_time),
                    }),
                };
                self.emit(event);
            }
            Err(e) => self.order_failed(OrderSide::Sell, e),
        }
    }

    fn order_failed(&self, side: OrderSide, err: ExecutorError) {
        if err.is_rejection() {
            warn!(symbol = %self.symbol, side = side.as_str(), error = %err, "Order not placed, retrying next candle");
        } else {
            error!(symbol = %self.symbol, side = side.as_str(), error = %err, "Order placement failed, retrying next candle");
        }
        self.emit(EngineEvent::OrderFailed {
            symbol: self.symbol.clone(),
            side,
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        debug!(kind = event.kind(), "Publishing engine event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
