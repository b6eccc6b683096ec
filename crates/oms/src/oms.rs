//! OMS facade.
//!
//! Owns the order state machine and position accounting, gates submissions
//! through the risk pipeline, and emits outbox events in the same store
//! transaction as the state they belong to. The OMS never performs network
//! I/O; the outbox worker and reconciler drive it from either side.
//!
//! Transitions (including their outbox emission) are serialized behind a
//! single lock; illegal transitions are logged and ignored at this boundary
//! so replayed or late venue messages cannot corrupt state.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use xmaker_core::clock::SharedClock;
use xmaker_core::config::{RiskConfig, TradingConfig};
use xmaker_core::types::{
    Fill, Order, OrderId, OrderState, OrderType, OutboxEvent, OutboxEventKind, Position,
    Price, Quantity, Side, Symbol, VenueOrderId,
};
use xmaker_risk::{
    DailyLossCheck, EmergencyStop, MaxOpenOrdersCheck, MaxPositionCheck, MaxSkewCheck,
    MinSizeCheck, RiskContext, RiskPipeline, RiskRejection, StopCheck,
};
use xmaker_store::{Store, StoreError};

use crate::dedup::FillDeduplicator;
use crate::position::PositionBook;

/// Seconds in the daily-loss accumulator window.
const DAILY_RESET_SECS: f64 = 86_400.0;

/// OMS operation failure.
#[derive(Debug, Error)]
pub enum OmsError {
    /// Pre-trade risk rejected the submission. No state was changed.
    #[error(transparent)]
    Risk(#[from] RiskRejection),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The order is unknown.
    #[error("unknown order: {0}")]
    UnknownOrder(String),
}

/// Notification emitted after a successful OMS transition.
#[derive(Debug, Clone)]
pub enum OmsEvent {
    /// Order accepted and handed to the outbox.
    Submitted(Order),
    /// Venue acknowledged the order.
    Acked(Order),
    /// A fill was applied.
    Filled { order: Order, fill: Fill },
    /// A cancel was handed to the outbox.
    CancelRequested(Order),
    /// The venue confirmed a cancel.
    Cancelled(Order),
    /// The order was rejected (by risk at submit time this is not emitted;
    /// by the venue it is).
    Rejected(Order),
    /// Delivery permanently failed.
    Failed(Order),
    /// A position changed.
    PositionChanged(Position),
}

/// Daily realized-P&L accumulator with a rolling 24 h reset.
struct DailyPnl {
    realized: f64,
    reset_at: f64,
}

/// Order management system.
pub struct Oms {
    store: Arc<Store>,
    clock: SharedClock,
    risk: RiskPipeline,
    positions: PositionBook,
    dedup: FillDeduplicator,
    trading: TradingConfig,
    orders: DashMap<OrderId, Order>,
    by_external: DashMap<String, OrderId>,
    daily: Mutex<DailyPnl>,
    observers: Mutex<Vec<mpsc::UnboundedSender<OmsEvent>>>,
    /// Serializes state transitions together with their outbox emission.
    transition_lock: Mutex<()>,
}

impl Oms {
    /// Build an OMS wired to the store and risk limits.
    pub fn new(
        store: Arc<Store>,
        clock: SharedClock,
        trading: TradingConfig,
        risk_cfg: &RiskConfig,
        stop: Arc<EmergencyStop>,
        base_asset: impl Into<String>,
    ) -> Self {
        let mut risk = RiskPipeline::new();
        risk.add_check(StopCheck { stop });
        risk.add_check(MinSizeCheck {
            min_quote_size: trading.min_quote_size,
        });
        risk.add_check(MaxPositionCheck {
            max_position_size: risk_cfg.max_position_size,
        });
        risk.add_check(MaxSkewCheck {
            max_skew: risk_cfg.max_skew,
        });
        risk.add_check(DailyLossCheck {
            max_daily_loss: risk_cfg.max_daily_loss,
        });
        risk.add_check(MaxOpenOrdersCheck {
            max_open_orders: risk_cfg.max_open_orders,
        });

        let now = clock.now();
        Self {
            store,
            clock,
            risk,
            positions: PositionBook::new(base_asset),
            dedup: FillDeduplicator::new(format!("{}", std::process::id())),
            trading,
            orders: DashMap::new(),
            by_external: DashMap::new(),
            daily: Mutex::new(DailyPnl {
                realized: 0.0,
                reset_at: now,
            }),
            observers: Mutex::new(Vec::new()),
            transition_lock: Mutex::new(()),
        }
    }

    /// Recover in-memory state from the store after a restart.
    pub fn recover(&self) -> Result<(), OmsError> {
        for state in [OrderState::Pending, OrderState::Working] {
            for order in self.store.orders_by_state(state)? {
                if let Some(ext) = &order.external_order_id {
                    self.by_external.insert(ext.0.clone(), order.order_id.clone());
                }
                self.orders.insert(order.order_id.clone(), order);
            }
        }
        for position in self.store.all_positions()? {
            self.positions.load(position);
        }
        tracing::info!(orders = self.orders.len(), "OMS state recovered");
        Ok(())
    }

    /// Register an observer channel. Send failures are logged and the
    /// channel dropped; observers can never affect OMS state.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OmsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Submit a new order.
    ///
    /// Runs all risk checks; on pass, persists the order in `pending`
    /// together with its `submit_order` outbox event in one transaction.
    /// A risk rejection changes nothing: no order row, no outbox row, no
    /// position change.
    pub fn submit(
        &self,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        quantity: Quantity,
        price: Option<Price>,
        quote_id: Option<String>,
    ) -> Result<Order, OmsError> {
        let now = self.clock.now();
        let order_id = OrderId::new(self.dedup.next_order_id());

        let mut order = Order {
            order_id: order_id.clone(),
            quote_id,
            symbol: symbol.clone(),
            side,
            order_type,
            price,
            quantity,
            filled_qty: Quantity::zero(Quantity::DEFAULT_SCALE),
            avg_fill_px: Price::zero(Price::DEFAULT_SCALE),
            state: OrderState::Idle,
            external_order_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let ctx = RiskContext {
            position_qty: self.positions.net_quantity(&symbol),
            daily_realized_pnl: self.daily_realized_pnl(now),
            open_order_count: self.open_order_count(),
        };
        if let Err(rejection) = self.risk.check_order(&order, &ctx) {
            tracing::warn!(
                order_id = %order_id,
                violations = rejection.violations.len(),
                "submission rejected by risk"
            );
            return Err(rejection.into());
        }

        let _guard = self.transition_lock.lock();
        order.state = OrderState::Pending;
        let event = OutboxEvent::new(
            OutboxEventKind::SubmitOrder,
            order_id.as_str(),
            submit_payload(&order),
            now,
        );
        self.store.insert_order_with_event(&order, &event)?;
        self.orders.insert(order_id.clone(), order.clone());

        tracing::info!(
            order_id = %order_id,
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            price = ?price.map(|p| p.to_f64()),
            "order submitted"
        );
        self.notify(OmsEvent::Submitted(order.clone()));
        Ok(order)
    }

    // ── Venue-driven transitions ────────────────────────────────────

    /// Apply a venue submit ack: `pending → working`.
    ///
    /// Late acks on terminal orders, and repeats of an ack already applied,
    /// are logged and ignored.
    pub fn apply_ack(&self, order_id: &OrderId, external_id: VenueOrderId) {
        let _guard = self.transition_lock.lock();
        let Some(order) = self.orders.get(order_id).map(|o| o.clone()) else {
            tracing::warn!(order_id = %order_id, "ack for unknown order ignored");
            return;
        };
        match order.state {
            OrderState::Pending => {}
            OrderState::Working => {
                tracing::debug!(order_id = %order_id, "duplicate ack ignored");
                return;
            }
            state => {
                tracing::warn!(order_id = %order_id, %state, "late ack on settled order ignored");
                return;
            }
        }

        let now = self.clock.now();
        if let Err(e) = self.store.update_order_state(
            order_id,
            OrderState::Pending,
            OrderState::Working,
            Some(&external_id),
            None,
            now,
        ) {
            tracing::error!(order_id = %order_id, error = %e, "ack persist failed");
            return;
        }

        let updated = self.mutate_order(order_id, |o| {
            o.state = OrderState::Working;
            o.external_order_id = Some(external_id.clone());
            o.updated_at = now;
        });
        self.by_external.insert(external_id.0.clone(), order_id.clone());

        tracing::info!(order_id = %order_id, external_id = %external_id, "order working");
        if let Some(order) = updated {
            self.notify(OmsEvent::Acked(order));
        }
    }

    /// Apply a fill. Idempotent by `fill_id`; updates the order's
    /// cumulative fill columns, the position, and the daily P&L, and
    /// transitions the order to `filled` once fully executed.
    pub fn apply_fill(&self, fill: &Fill) -> Result<(), OmsError> {
        let now = self.clock.now();
        if self.dedup.is_duplicate(&fill.fill_id) {
            tracing::debug!(fill_id = %fill.fill_id, "duplicate fill ignored");
            return Ok(());
        }

        let _guard = self.transition_lock.lock();
        let Some(order) = self.orders.get(&fill.order_id).map(|o| o.clone()) else {
            // An order this process never created. The cleanup sweep cancels
            // those; counting the fill would corrupt the position math.
            tracing::warn!(
                fill_id = %fill.fill_id,
                order_id = %fill.order_id,
                "fill for untracked order ignored"
            );
            return Ok(());
        };

        // Store-level uniqueness is the second line of dedup defense.
        if !self.store.insert_fill(fill)? {
            tracing::debug!(fill_id = %fill.fill_id, "fill already stored, ignored");
            self.dedup.record_fill(fill.fill_id.clone(), now);
            return Ok(());
        }

        let new_filled = order.filled_qty + fill.quantity;
        if new_filled > order.quantity {
            tracing::error!(
                fill_id = %fill.fill_id,
                order_id = %fill.order_id,
                filled = new_filled.to_f64(),
                quantity = order.quantity.to_f64(),
                "fill exceeds order quantity, ignored"
            );
            return Ok(());
        }

        // VWAP over the order's cumulative fills.
        let prior_notional = order.filled_qty.to_f64() * order.avg_fill_px.to_f64();
        let fill_notional = fill.quantity.to_f64() * fill.price.to_f64();
        let avg_fill_px = Price::from((prior_notional + fill_notional) / new_filled.to_f64());

        self.store
            .update_order_fill(&fill.order_id, new_filled, avg_fill_px, now)?;

        let update = self.positions.apply_fill(fill, now);
        self.store.upsert_position(&update.position)?;
        self.add_daily_realized(update.realized_delta, now);
        self.dedup.record_fill(fill.fill_id.clone(), now);

        let fully_filled = new_filled >= order.quantity;
        let updated = self.mutate_order(&fill.order_id, |o| {
            o.filled_qty = new_filled;
            o.avg_fill_px = avg_fill_px;
            o.updated_at = now;
            if fully_filled && o.state == OrderState::Working {
                o.state = OrderState::Filled;
            }
        });

        if fully_filled {
            match order.state {
                OrderState::Working => {
                    self.store.update_order_state(
                        &fill.order_id,
                        OrderState::Working,
                        OrderState::Filled,
                        None,
                        None,
                        now,
                    )?;
                    tracing::info!(order_id = %fill.order_id, "order filled");
                }
                state => {
                    tracing::warn!(
                        order_id = %fill.order_id,
                        %state,
                        "full fill on order not working; fill recorded, state untouched"
                    );
                }
            }
        }

        tracing::info!(
            fill_id = %fill.fill_id,
            order_id = %fill.order_id,
            quantity = %fill.quantity,
            price = %fill.price,
            total_filled = new_filled.to_f64(),
            "fill applied"
        );

        if let Some(order) = updated {
            self.notify(OmsEvent::Filled {
                order,
                fill: fill.clone(),
            });
        }
        self.notify(OmsEvent::PositionChanged(update.position));
        Ok(())
    }

    /// Request a cancel: enqueues a `cancel_order` outbox event for an
    /// active order. Cancelling a settled order is a no-op.
    pub fn request_cancel(&self, order_id: &OrderId, reason: &str) -> Result<(), OmsError> {
        let _guard = self.transition_lock.lock();
        let Some(order) = self.orders.get(order_id).map(|o| o.clone()) else {
            tracing::warn!(order_id = %order_id, "cancel for unknown order ignored");
            return Ok(());
        };
        if order.state.is_terminal() {
            tracing::debug!(order_id = %order_id, state = %order.state, "cancel of settled order ignored");
            return Ok(());
        }

        // One live cancel per order.
        if self
            .store
            .live_events_for_aggregate(order_id.as_str(), OutboxEventKind::CancelOrder)?
            > 0
        {
            tracing::debug!(order_id = %order_id, "cancel already in flight");
            return Ok(());
        }

        let now = self.clock.now();
        let event = OutboxEvent::new(
            OutboxEventKind::CancelOrder,
            order_id.as_str(),
            cancel_payload(&order, reason),
            now,
        );
        self.store.append_event_checked(
            order_id,
            &[OrderState::Pending, OrderState::Working],
            &event,
        )?;

        tracing::info!(order_id = %order_id, reason, "cancel requested");
        self.notify(OmsEvent::CancelRequested(order));
        Ok(())
    }

    /// The venue confirmed our cancel: `working → cancelled`.
    pub fn apply_cancel_confirmed(&self, order_id: &OrderId, reason: &str) {
        self.settle(order_id, OrderState::Cancelled, Some(reason));
    }

    /// The venue cancelled the order on its own initiative.
    pub fn apply_external_cancel(&self, order_id: &OrderId, reason: &str) {
        self.settle(order_id, OrderState::Cancelled, Some(reason));
    }

    /// The venue rejected the order: `pending|working → rejected`.
    pub fn apply_reject(&self, order_id: &OrderId, reason: &str) {
        self.settle(order_id, OrderState::Rejected, Some(reason));
    }

    /// Delivery permanently failed (outbox dead letter): `pending → failed`.
    pub fn apply_failed(&self, order_id: &OrderId, reason: &str) {
        self.settle(order_id, OrderState::Failed, Some(reason));
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Look up an order by client id.
    pub fn get_order(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    /// Resolve a venue order id to our client id.
    pub fn resolve_external(&self, external_id: &str) -> Option<OrderId> {
        self.by_external.get(external_id).map(|e| e.clone())
    }

    /// Count of non-terminal orders in the in-memory index.
    pub fn open_order_count(&self) -> u32 {
        self.orders
            .iter()
            .filter(|e| !e.value().state.is_terminal())
            .count() as u32
    }

    /// Open (pending or working) orders for a symbol.
    pub fn open_orders(&self, symbol: &Symbol) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|e| {
                !e.value().state.is_terminal() && &e.value().symbol == symbol
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Position snapshot for a symbol.
    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.get(symbol)
    }

    /// Mark-to-market unrealized P&L for a symbol.
    pub fn unrealized_pnl(&self, symbol: &Symbol, mark: Price) -> f64 {
        self.positions.unrealized_pnl(symbol, mark)
    }

    /// Realized P&L accumulated in the current daily window.
    pub fn daily_realized_pnl(&self, now: f64) -> f64 {
        let mut daily = self.daily.lock();
        if now - daily.reset_at > DAILY_RESET_SECS {
            tracing::info!(
                window_pnl = daily.realized,
                "daily P&L window reset"
            );
            daily.realized = 0.0;
            daily.reset_at = now;
        }
        daily.realized
    }

    /// Prune the fill dedup set.
    pub fn prune_dedup(&self, max_age_secs: f64) {
        self.dedup.prune(self.clock.now(), max_age_secs);
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Settle an order into a terminal state, validating the transition.
    /// Illegal requests are logged and ignored.
    fn settle(&self, order_id: &OrderId, to: OrderState, reason: Option<&str>) {
        let _guard = self.transition_lock.lock();
        let Some(order) = self.orders.get(order_id).map(|o| o.clone()) else {
            tracing::warn!(order_id = %order_id, target = %to, "transition for unknown order ignored");
            return;
        };

        if !order.state.can_transition_to(to) {
            if order.state.is_terminal() {
                tracing::debug!(
                    order_id = %order_id,
                    state = %order.state,
                    target = %to,
                    "transition on settled order ignored"
                );
            } else {
                tracing::error!(
                    order_id = %order_id,
                    state = %order.state,
                    target = %to,
                    "illegal transition ignored"
                );
            }
            return;
        }

        let now = self.clock.now();
        if let Err(e) =
            self.store
                .update_order_state(order_id, order.state, to, None, reason, now)
        {
            tracing::error!(order_id = %order_id, error = %e, "transition persist failed");
            return;
        }

        let updated = self.mutate_order(order_id, |o| {
            o.state = to;
            o.updated_at = now;
            if let Some(r) = reason {
                o.error_message = Some(r.to_string());
            }
        });

        tracing::info!(order_id = %order_id, from = %order.state, to = %to, reason = ?reason, "order settled");
        if let Some(order) = updated {
            let event = match to {
                OrderState::Cancelled => OmsEvent::Cancelled(order),
                OrderState::Rejected => OmsEvent::Rejected(order),
                OrderState::Failed => OmsEvent::Failed(order),
                _ => return,
            };
            self.notify(event);
        }
    }

    fn mutate_order(&self, order_id: &OrderId, f: impl FnOnce(&mut Order)) -> Option<Order> {
        let mut entry = self.orders.get_mut(order_id)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    fn add_daily_realized(&self, delta: f64, now: f64) {
        // Touch the window first so a stale accumulator resets before the
        // new delta lands in it.
        self.daily_realized_pnl(now);
        self.daily.lock().realized += delta;
    }

    fn notify(&self, event: OmsEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("observer channel closed, dropping");
                false
            }
        });
    }

    /// Trading configuration this OMS was built with.
    pub fn trading_config(&self) -> &TradingConfig {
        &self.trading
    }
}

/// Payload for a `submit_order` outbox event.
fn submit_payload(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "order_id": order.order_id.as_str(),
        "symbol": order.symbol.as_str(),
        "side": order.side.as_str(),
        "order_type": order.order_type.as_str(),
        "price": order.price.map(|p| p.to_f64()),
        "quantity": order.quantity.to_f64(),
    })
}

/// Payload for a `cancel_order` outbox event.
fn cancel_payload(order: &Order, reason: &str) -> serde_json::Value {
    serde_json::json!({
        "order_id": order.order_id.as_str(),
        "external_order_id": order.external_order_id.as_ref().map(|e| e.0.clone()),
        "symbol": order.symbol.as_str(),
        "reason": reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmaker_core::clock::{Clock, ManualClock};

    fn trading_cfg() -> TradingConfig {
        TradingConfig {
            symbol_src: "ADAUSDT".into(),
            symbol_dst: "ADAUSDM".into(),
            base_spread_bps: 8.0,
            tick_spread_bps: 10.0,
            num_layers: 10,
            total_liquidity: 5000.0,
            layer_liquidity_multiplier: 1.0,
            min_edge_bps: 1.0,
            min_half_spread_bps: 1.0,
            max_half_spread_bps: 50.0,
            size_mult_min: 0.1,
            size_mult_max: 3.0,
            skew_spread_gain: 10.0,
            skew_size_gain: 0.8,
            gamma_max: 0.5,
            target_asset_ratio: 1.0,
            ratio_tolerance: 0.1,
            min_requote_ms: 100,
            requote_tick_threshold: 0.0001,
            stale_ms: 5000,
            quote_ttl_ms: 2000,
            min_quote_size: 10.0,
            price_tick: 0.0001,
            qty_step: 1.0,
            sides: vec!["bid".into(), "ask".into()],
        }
    }

    fn risk_cfg() -> RiskConfig {
        RiskConfig {
            max_position_size: 5000.0,
            max_daily_loss: 1000.0,
            max_open_orders: 50,
            max_skew: 2000.0,
            emergency_stop: false,
        }
    }

    struct Fixture {
        oms: Oms,
        store: Arc<Store>,
        clock: Arc<ManualClock>,
        stop: Arc<EmergencyStop>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000.0));
        let stop = Arc::new(EmergencyStop::default());
        let oms = Oms::new(
            store.clone(),
            clock.clone(),
            trading_cfg(),
            &risk_cfg(),
            stop.clone(),
            "ADA",
        );
        Fixture {
            oms,
            store,
            clock,
            stop,
        }
    }

    fn submit_order(oms: &Oms, qty: f64) -> Order {
        oms.submit(
            Symbol::new("ADAUSDM"),
            Side::Buy,
            OrderType::Limit,
            Quantity::from(qty),
            Some(Price::from(0.4998)),
            None,
        )
        .unwrap()
    }

    fn make_fill(order: &Order, fill_id: &str, qty: f64, price: f64) -> Fill {
        Fill {
            fill_id: fill_id.into(),
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: Price::from(price),
            quantity: Quantity::from(qty),
            executed_at: 1_001.0,
            trade_id: None,
            commission: Price::zero(8),
            commission_asset: None,
            is_maker: true,
        }
    }

    #[test]
    fn test_submit_persists_order_and_event() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        assert_eq!(order.state, OrderState::Pending);

        let stored = f.store.get_order(&order.order_id).unwrap().unwrap();
        assert_eq!(stored.state, OrderState::Pending);

        let claimed = f.store.claim_pending(10, 2_000.0).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event.kind, OutboxEventKind::SubmitOrder);
        assert_eq!(claimed[0].event.aggregate_id, order.order_id.as_str());
    }

    #[test]
    fn test_risk_rejection_changes_nothing() {
        let f = fixture();
        f.stop.engage("test");

        let err = f
            .oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Buy,
                OrderType::Limit,
                Quantity::from(100.0),
                Some(Price::from(0.4998)),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, OmsError::Risk(_)));

        // No order row, no outbox event, no position change.
        assert_eq!(f.oms.open_order_count(), 0);
        assert!(f.store.claim_pending(10, 2_000.0).unwrap().is_empty());
        assert!(f.oms.position(&Symbol::new("ADAUSDM")).is_none());
    }

    #[test]
    fn test_rejection_lists_all_violations() {
        let f = fixture();
        f.stop.engage("test");
        // Undersized as well: both violations must be reported.
        let err = f
            .oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Buy,
                OrderType::Limit,
                Quantity::from(1.0),
                Some(Price::from(0.4998)),
                None,
            )
            .unwrap_err();
        let OmsError::Risk(rejection) = err else {
            panic!("expected risk rejection");
        };
        assert_eq!(rejection.violations.len(), 2);
    }

    #[test]
    fn test_ack_moves_pending_to_working() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);

        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Working);
        assert_eq!(
            f.oms.resolve_external("EXT-1"),
            Some(order.order_id.clone())
        );
        let stored = f.store.get_order(&order.order_id).unwrap().unwrap();
        assert_eq!(stored.state, OrderState::Working);
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        assert_eq!(f.oms.get_order(&order.order_id).unwrap().state, OrderState::Working);
    }

    #[test]
    fn test_fill_updates_vwap_and_position() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        f.oms.apply_fill(&make_fill(&order, "f-1", 40.0, 0.4998)).unwrap();
        f.oms.apply_fill(&make_fill(&order, "f-2", 60.0, 0.5000)).unwrap();

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Filled);
        assert_eq!(updated.filled_qty, Quantity::from(100.0));
        // VWAP = (40·0.4998 + 60·0.5) / 100 = 0.49992
        assert!((updated.avg_fill_px.to_f64() - 0.49992).abs() < 1e-9);

        let pos = f.oms.position(&Symbol::new("ADAUSDM")).unwrap();
        assert!((pos.quantity.to_f64() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_fill_is_noop() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        f.oms.apply_fill(&make_fill(&order, "f-1", 40.0, 0.4998)).unwrap();
        f.oms.apply_fill(&make_fill(&order, "f-1", 40.0, 0.4998)).unwrap();

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.filled_qty, Quantity::from(40.0));
        let pos = f.oms.position(&Symbol::new("ADAUSDM")).unwrap();
        assert!((pos.quantity.to_f64() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_then_external_cancel_race() {
        // The venue fully fills the order, then its cancel confirmation
        // arrives late: the fill wins and the cancel is a no-op.
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        f.oms.apply_fill(&make_fill(&order, "f-1", 100.0, 0.4998)).unwrap();
        f.oms.apply_external_cancel(&order.order_id, "venue cancel");

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Filled);
        let pos = f.oms.position(&Symbol::new("ADAUSDM")).unwrap();
        assert!((pos.quantity.to_f64() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_request_enqueues_once() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        f.oms.request_cancel(&order.order_id, "requote").unwrap();
        f.oms.request_cancel(&order.order_id, "requote again").unwrap();

        // Exactly one live cancel event for the order.
        assert_eq!(
            f.store
                .live_events_for_aggregate(order.order_id.as_str(), OutboxEventKind::CancelOrder)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_cancel_of_settled_order_is_noop() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        f.oms.apply_fill(&make_fill(&order, "f-1", 100.0, 0.4998)).unwrap();

        f.oms.request_cancel(&order.order_id, "too late").unwrap();
        let claimed = f.store.claim_pending(10, 2_000.0).unwrap();
        assert!(claimed
            .iter()
            .all(|c| c.event.kind != OutboxEventKind::CancelOrder));
    }

    #[test]
    fn test_reject_from_pending() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_reject(&order.order_id, "bad price band");

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Rejected);
        assert_eq!(updated.error_message.as_deref(), Some("bad price band"));
        assert_eq!(f.oms.open_order_count(), 0);
    }

    #[test]
    fn test_failed_from_pending() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_failed(&order.order_id, "retries exhausted");
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Failed
        );
    }

    #[test]
    fn test_terminal_states_never_leave() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_reject(&order.order_id, "rejected");

        // Every further transition must be ignored.
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        f.oms.apply_cancel_confirmed(&order.order_id, "x");
        f.oms.apply_failed(&order.order_id, "y");
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Rejected
        );
    }

    #[test]
    fn test_daily_pnl_accumulates_and_resets() {
        let f = fixture();
        let order = submit_order(&f.oms, 200.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        f.oms.apply_fill(&make_fill(&order, "f-1", 200.0, 0.50)).unwrap();

        // Sell half at a profit through a second order.
        let sell = f
            .oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Sell,
                OrderType::Limit,
                Quantity::from(100.0),
                Some(Price::from(0.52)),
                None,
            )
            .unwrap();
        f.oms.apply_ack(&sell.order_id, VenueOrderId("EXT-2".into()));
        let mut fill = make_fill(&sell, "f-2", 100.0, 0.52);
        fill.side = Side::Sell;
        f.oms.apply_fill(&fill).unwrap();

        let now = f.clock.now();
        assert!((f.oms.daily_realized_pnl(now) - 2.0).abs() < 1e-9);

        // 25 hours later the window resets.
        f.clock.advance(25.0 * 3600.0);
        assert_eq!(f.oms.daily_realized_pnl(f.clock.now()), 0.0);
    }

    #[test]
    fn test_open_order_limit_enforced() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000.0));
        let mut risk = risk_cfg();
        risk.max_open_orders = 2;
        let oms = Oms::new(
            store,
            clock,
            trading_cfg(),
            &risk,
            Arc::new(EmergencyStop::default()),
            "ADA",
        );

        submit_order(&oms, 100.0);
        submit_order(&oms, 100.0);
        let err = oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Buy,
                OrderType::Limit,
                Quantity::from(100.0),
                Some(Price::from(0.4998)),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, OmsError::Risk(_)));
    }

    #[test]
    fn test_observers_receive_events() {
        let f = fixture();
        let mut rx = f.oms.subscribe();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, OmsEvent::Submitted(_)));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, OmsEvent::Acked(_)));
    }

    #[test]
    fn test_dropped_observer_does_not_affect_state() {
        let f = fixture();
        let rx = f.oms.subscribe();
        drop(rx);

        // The dropped observer must not break submission.
        let order = submit_order(&f.oms, 100.0);
        assert_eq!(order.state, OrderState::Pending);
    }

    #[test]
    fn test_recover_restores_index() {
        let f = fixture();
        let order = submit_order(&f.oms, 100.0);
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));

        // Fresh OMS over the same store.
        let oms2 = Oms::new(
            f.store.clone(),
            f.clock.clone(),
            trading_cfg(),
            &risk_cfg(),
            Arc::new(EmergencyStop::default()),
            "ADA",
        );
        oms2.recover().unwrap();
        assert_eq!(oms2.open_order_count(), 1);
        assert_eq!(oms2.resolve_external("EXT-1"), Some(order.order_id));
    }

    #[test]
    fn test_fill_for_untracked_order_ignored() {
        let f = fixture();
        let ghost = Order {
            order_id: OrderId::new("ghost"),
            quote_id: None,
            symbol: Symbol::new("ADAUSDM"),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: None,
            quantity: Quantity::from(10.0),
            filled_qty: Quantity::zero(8),
            avg_fill_px: Price::zero(8),
            state: OrderState::Working,
            external_order_id: None,
            error_message: None,
            created_at: 0.0,
            updated_at: 0.0,
        };
        f.oms.apply_fill(&make_fill(&ghost, "f-1", 10.0, 0.5)).unwrap();
        assert!(f.oms.position(&Symbol::new("ADAUSDM")).is_none());
    }
}
