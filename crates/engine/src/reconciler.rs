//! Account-stream reconciler.
//!
//! The reconciler is the authoritative writer for balances and positions:
//! it applies every destination account event to the store and drives the
//! OMS state machine. It is idempotent under replay — fills are deduped by
//! id in the OMS, balance upserts are last-write-wins — and it converges
//! the venue toward "no orders we do not own" by enqueueing cancels for
//! unknown order ids it discovers.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;
use xmaker_core::types::{
    Balance, BookTicker, Fill, OrderId, OutboxEvent, OutboxEventKind, Price, Quantity, Side,
    Symbol, VenueOrderId,
};
use xmaker_oms::Oms;
use xmaker_quote::SkewGauge;
use xmaker_store::Store;
use xmaker_stream::AccountEvent;

/// Balance change below which updates are not logged.
const BALANCE_LOG_THRESHOLD: f64 = 0.001;

/// Applies account-stream events to the store and the OMS.
pub struct Reconciler {
    store: Arc<Store>,
    oms: Arc<Oms>,
    skew: Arc<SkewGauge>,
    clock: SharedClock,
    /// Latest source tick, used to mark base-asset balances in USD.
    reference: watch::Receiver<Option<BookTicker>>,
    base_asset: String,
    quote_asset: String,
}

impl Reconciler {
    /// Wire a reconciler.
    pub fn new(
        store: Arc<Store>,
        oms: Arc<Oms>,
        skew: Arc<SkewGauge>,
        clock: SharedClock,
        reference: watch::Receiver<Option<BookTicker>>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            store,
            oms,
            skew,
            clock,
            reference,
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
        }
    }

    /// Consume events until the channel closes or cancellation fires.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AccountEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("reconciler started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::warn!("account event channel closed");
                        break;
                    }
                },
            };
            self.handle_event(event);
        }
        tracing::info!("reconciler stopped");
    }

    /// Apply one account event. Public so the flow can be driven directly
    /// in tests.
    pub fn handle_event(&mut self, event: AccountEvent) {
        match event {
            AccountEvent::Balance {
                asset,
                available,
                locked,
            } => self.handle_balance(&asset, available, locked),
            AccountEvent::OrderUpdate {
                external_order_id,
                status,
                reason,
            } => self.handle_order_update(&external_order_id, &status, reason.as_deref()),
            AccountEvent::Fill {
                fill_id,
                external_order_id,
                symbol,
                side,
                price,
                quantity,
                executed_at,
                commission,
                commission_asset,
                is_maker,
            } => self.handle_fill(
                fill_id,
                &external_order_id,
                symbol,
                side,
                price,
                quantity,
                executed_at,
                commission,
                commission_asset,
                is_maker,
            ),
        }
    }

    fn handle_balance(&mut self, asset: &str, available: f64, locked: f64) {
        let now = self.clock.now();
        let balance = Balance::new(
            asset,
            Quantity::from(available),
            Quantity::from(locked),
            now,
        );

        let previous = match self.store.get_balance(asset) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(asset, error = %e, "balance read failed");
                None
            }
        };
        if let Err(e) = self.store.upsert_balance(&balance) {
            tracing::error!(asset, error = %e, "balance persist failed");
            return;
        }

        let total = available + locked;
        match previous {
            Some(prev) => {
                let change = total - prev.total.to_f64();
                if change.abs() > BALANCE_LOG_THRESHOLD {
                    tracing::info!(asset, old_total = prev.total.to_f64(), new_total = total, change, "balance updated");
                }
            }
            None => {
                tracing::info!(asset, total, "initial balance");
            }
        }

        if let Some(price_usd) = self.mark_price_usd(asset) {
            self.skew.update_balance(asset, total, price_usd, now);
        }
    }

    fn handle_order_update(&self, external_id: &str, status: &str, reason: Option<&str>) {
        let Some(order_id) = self.resolve(external_id) else {
            // An order we do not own. Cancel it so the venue converges to
            // our book only; terminal statuses need no action.
            if matches!(status, "open" | "new" | "partially_filled") {
                self.enqueue_unregistered_cancel(external_id);
            }
            return;
        };

        match status {
            "open" | "new" => {
                self.oms
                    .apply_ack(&order_id, VenueOrderId(external_id.to_string()));
            }
            "cancelled" => {
                self.oms
                    .apply_external_cancel(&order_id, reason.unwrap_or("venue cancel"));
            }
            "rejected" => {
                self.oms
                    .apply_reject(&order_id, reason.unwrap_or("venue reject"));
            }
            // Fill events carry the execution details; the status echo has
            // nothing to add.
            "filled" | "partially_filled" => {}
            other => {
                tracing::warn!(external_id, status = other, "unknown order status dropped");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_fill(
        &self,
        fill_id: String,
        external_id: &str,
        symbol: String,
        side: String,
        price: f64,
        quantity: f64,
        executed_at: f64,
        commission: f64,
        commission_asset: Option<String>,
        is_maker: bool,
    ) {
        let Some(order_id) = self.resolve(external_id) else {
            tracing::warn!(
                fill_id,
                external_id,
                "fill for unregistered order; sweep will cancel it"
            );
            self.enqueue_unregistered_cancel(external_id);
            return;
        };
        let Some(side) = Side::parse(&side) else {
            tracing::warn!(fill_id, side, "fill with unknown side dropped");
            return;
        };

        let fill = Fill {
            fill_id,
            order_id,
            symbol: Symbol::new(symbol),
            side,
            price: Price::from(price),
            quantity: Quantity::from(quantity),
            executed_at,
            trade_id: None,
            commission: Price::from(commission),
            commission_asset,
            is_maker,
        };
        if let Err(e) = self.oms.apply_fill(&fill) {
            tracing::error!(fill_id = %fill.fill_id, error = %e, "fill application failed");
        }
    }

    /// Resolve a venue order id through the OMS index, falling back to the
    /// store for orders from a previous run.
    fn resolve(&self, external_id: &str) -> Option<OrderId> {
        if let Some(order_id) = self.oms.resolve_external(external_id) {
            return Some(order_id);
        }
        match self.store.get_order_by_external(external_id) {
            Ok(order) => order.map(|o| o.order_id),
            Err(e) => {
                tracing::error!(external_id, error = %e, "external id lookup failed");
                None
            }
        }
    }

    fn enqueue_unregistered_cancel(&self, external_id: &str) {
        // One live cancel per unknown id.
        match self
            .store
            .live_events_for_aggregate(external_id, OutboxEventKind::CancelOrder)
        {
            Ok(0) => {}
            Ok(_) => return,
            Err(e) => {
                tracing::error!(external_id, error = %e, "live event lookup failed");
                return;
            }
        }

        let event = OutboxEvent::new(
            OutboxEventKind::CancelOrder,
            external_id,
            serde_json::json!({
                "external_order_id": external_id,
                "reason": "unregistered order",
            }),
            self.clock.now(),
        );
        match self.store.enqueue_event(&event) {
            Ok(()) => {
                tracing::warn!(external_id, "cancel enqueued for unregistered order");
            }
            Err(e) => {
                tracing::error!(external_id, error = %e, "unregistered cancel enqueue failed");
            }
        }
    }

    /// USD mark for an asset: the quote asset is the numeraire, the base
    /// asset marks at the latest reference mid. Unknown assets are skipped.
    fn mark_price_usd(&mut self, asset: &str) -> Option<f64> {
        if asset == self.quote_asset {
            Some(1.0)
        } else if asset == self.base_asset {
            self.reference.borrow().as_ref().map(|t| t.mid())
        } else {
            tracing::debug!(asset, "no USD mark for asset, skew unchanged");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmaker_core::clock::ManualClock;
    use xmaker_core::config::{RiskConfig, TradingConfig};
    use xmaker_core::types::{OrderState, OrderType, OutboxStatus};
    use xmaker_risk::EmergencyStop;

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

    struct Fixture {
        reconciler: Reconciler,
        store: Arc<Store>,
        oms: Arc<Oms>,
        skew: Arc<SkewGauge>,
        reference_tx: watch::Sender<Option<BookTicker>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000.0));
        let risk = RiskConfig {
            max_position_size: 5000.0,
            max_daily_loss: 1000.0,
            max_open_orders: 50,
            max_skew: 2000.0,
            emergency_stop: false,
        };
        let oms = Arc::new(Oms::new(
            store.clone(),
            clock.clone(),
            trading_cfg(),
            &risk,
            Arc::new(EmergencyStop::default()),
            "ADA",
        ));
        let skew = Arc::new(SkewGauge::new("ADA", "USDM", 0.5, 1.0, 0.1));
        let (reference_tx, reference_rx) = watch::channel(None);
        let reconciler = Reconciler::new(
            store.clone(),
            oms.clone(),
            skew.clone(),
            clock,
            reference_rx,
            "ADA",
            "USDM",
        );
        Fixture {
            reconciler,
            store,
            oms,
            skew,
            reference_tx,
        }
    }

    fn working_order(f: &Fixture) -> xmaker_core::types::Order {
        let order = f
            .oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Buy,
                OrderType::Limit,
                Quantity::from(100.0),
                Some(Price::from(0.4998)),
                None,
            )
            .unwrap();
        f.oms
            .apply_ack(&order.order_id, VenueOrderId("EXT-1".into()));
        f.oms.get_order(&order.order_id).unwrap()
    }

    fn tick(mid: f64) -> BookTicker {
        BookTicker {
            symbol: Symbol::new("ADAUSDT"),
            bid_px: Price::from(mid - 0.0001),
            bid_qty: Quantity::from(100.0),
            ask_px: Price::from(mid + 0.0001),
            ask_qty: Quantity::from(100.0),
            ts: 1_000.0,
        }
    }

    #[test]
    fn test_balance_upserted_and_marked() {
        let mut f = fixture();
        f.reference_tx.send(Some(tick(0.5))).unwrap();

        f.reconciler.handle_event(AccountEvent::Balance {
            asset: "USDM".into(),
            available: 1300.0,
            locked: 100.0,
        });
        f.reconciler.handle_event(AccountEvent::Balance {
            asset: "ADA".into(),
            available: 2000.0,
            locked: 0.0,
        });

        let stored = f.store.get_balance("USDM").unwrap().unwrap();
        assert_eq!(stored.total, Quantity::from(1400.0));

        // USDM 1400, ADA 2000 · 0.5 = 1000 → gamma = 400/2400.
        assert!((f.skew.gamma() - 0.16667).abs() < 1e-4);
    }

    #[test]
    fn test_balance_replay_idempotent() {
        let mut f = fixture();
        let event = AccountEvent::Balance {
            asset: "USDM".into(),
            available: 900.0,
            locked: 100.0,
        };
        f.reconciler.handle_event(event.clone());
        f.reconciler.handle_event(event);

        let stored = f.store.get_balance("USDM").unwrap().unwrap();
        assert_eq!(stored.total, Quantity::from(1000.0));
    }

    #[test]
    fn test_order_update_acks_pending_order() {
        let f = fixture();
        let order = f
            .oms
            .submit(
                Symbol::new("ADAUSDM"),
                Side::Buy,
                OrderType::Limit,
                Quantity::from(100.0),
                Some(Price::from(0.4998)),
                None,
            )
            .unwrap();
        // The venue assigned EXT-9 and reported the order open before the
        // outbox ack round-trip finished.
        let mut r = f.reconciler;
        // Simulate the ack path having stored the external id already.
        f.oms.apply_ack(&order.order_id, VenueOrderId("EXT-9".into()));
        r.handle_event(AccountEvent::OrderUpdate {
            external_order_id: "EXT-9".into(),
            status: "open".into(),
            reason: None,
        });
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Working
        );
    }

    #[test]
    fn test_external_cancel_applied() {
        let mut f = fixture();
        let order = working_order(&f);

        f.reconciler.handle_event(AccountEvent::OrderUpdate {
            external_order_id: "EXT-1".into(),
            status: "cancelled".into(),
            reason: Some("expired".into()),
        });

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Cancelled);
        assert_eq!(updated.error_message.as_deref(), Some("expired"));
    }

    #[test]
    fn test_reject_applied() {
        let mut f = fixture();
        let order = working_order(&f);

        f.reconciler.handle_event(AccountEvent::OrderUpdate {
            external_order_id: "EXT-1".into(),
            status: "rejected".into(),
            reason: None,
        });
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Rejected
        );
    }

    #[test]
    fn test_fill_applied_through_oms() {
        let mut f = fixture();
        let order = working_order(&f);

        f.reconciler.handle_event(AccountEvent::Fill {
            fill_id: "exec-1".into(),
            external_order_id: "EXT-1".into(),
            symbol: "ADAUSDM".into(),
            side: "buy".into(),
            price: 0.4998,
            quantity: 100.0,
            executed_at: 1_001.0,
            commission: 0.0,
            commission_asset: None,
            is_maker: true,
        });

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Filled);
        assert_eq!(updated.filled_qty, Quantity::from(100.0));
    }

    #[test]
    fn test_fill_replay_deduped() {
        let mut f = fixture();
        working_order(&f);

        let fill_event = AccountEvent::Fill {
            fill_id: "exec-1".into(),
            external_order_id: "EXT-1".into(),
            symbol: "ADAUSDM".into(),
            side: "buy".into(),
            price: 0.4998,
            quantity: 40.0,
            executed_at: 1_001.0,
            commission: 0.0,
            commission_asset: None,
            is_maker: true,
        };
        f.reconciler.handle_event(fill_event.clone());
        f.reconciler.handle_event(fill_event);

        let pos = f.oms.position(&Symbol::new("ADAUSDM")).unwrap();
        assert!((pos.quantity.to_f64() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_open_order_gets_cancel_enqueued() {
        let mut f = fixture();
        f.reconciler.handle_event(AccountEvent::OrderUpdate {
            external_order_id: "GHOST-1".into(),
            status: "open".into(),
            reason: None,
        });

        let claimed = f.store.claim_pending(10, 2_000.0).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event.kind, OutboxEventKind::CancelOrder);
        assert_eq!(claimed[0].event.aggregate_id, "GHOST-1");
    }

    #[test]
    fn test_unknown_order_cancel_not_duplicated() {
        let mut f = fixture();
        for _ in 0..3 {
            f.reconciler.handle_event(AccountEvent::OrderUpdate {
                external_order_id: "GHOST-1".into(),
                status: "open".into(),
                reason: None,
            });
        }
        assert_eq!(f.store.outbox_count(OutboxStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_unknown_terminal_status_ignored() {
        let mut f = fixture();
        f.reconciler.handle_event(AccountEvent::OrderUpdate {
            external_order_id: "GHOST-2".into(),
            status: "cancelled".into(),
            reason: None,
        });
        assert_eq!(f.store.outbox_count(OutboxStatus::Pending).unwrap(), 0);
    }
}
