//! Outbox dispatch worker.
//!
//! Pulls claimed events from the store, acquires a rate-limit token per
//! event, and dispatches through the [`VenueGateway`]. Per-aggregate FIFO
//! and one-in-flight are enforced by the store's claim query; this worker
//! only decides what happens after a dispatch attempt:
//!
//! - success → event `completed`, OMS told (`apply_ack` /
//!   `apply_cancel_confirmed`);
//! - transient failure → exponential backoff with jitter, back to
//!   `pending`, until `max_retries` pushes it to `dead_letter` and the
//!   order to `failed`;
//! - terminal failure → event `failed`, order `rejected`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;
use xmaker_core::config::OutboxConfig;
use xmaker_core::types::{OrderId, OutboxEvent, OutboxEventKind, VenueOrderId};
use xmaker_execution::{GatewaySubmit, RateLimiter, VenueError, VenueGateway};
use xmaker_oms::Oms;
use xmaker_store::Store;

/// Retry schedule: `min(cap, base · 2^n)` with ±20 % jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before dead-lettering.
    pub max_retries: u32,
    /// Base delay.
    pub base: Duration,
    /// Delay cap.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Backoff for the given retry ordinal (0-based).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let base = self
            .base
            .saturating_mul(2u32.saturating_pow(retry_count))
            .min(self.cap);
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    }
}

impl From<&OutboxConfig> for RetryPolicy {
    fn from(cfg: &OutboxConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base: Duration::from_millis(cfg.retry_base_ms),
            cap: Duration::from_millis(cfg.retry_cap_ms),
        }
    }
}

/// Outbox dispatcher. Run several via [`OutboxWorker::run`] for parallel
/// dispatch across aggregates; the store keeps each aggregate serial.
pub struct OutboxWorker {
    store: Arc<Store>,
    gateway: Arc<dyn VenueGateway>,
    limiter: Arc<RateLimiter>,
    oms: Arc<Oms>,
    clock: SharedClock,
    batch_size: u32,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl OutboxWorker {
    /// Wire a worker.
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn VenueGateway>,
        limiter: Arc<RateLimiter>,
        oms: Arc<Oms>,
        clock: SharedClock,
        cfg: &OutboxConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            limiter,
            oms,
            clock,
            batch_size: cfg.batch_size,
            poll_interval: Duration::from_millis(cfg.poll_ms),
            retry: RetryPolicy::from(cfg),
        }
    }

    /// Poll loop until cancelled. In-flight dispatches complete before the
    /// loop exits.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(batch_size = self.batch_size, "outbox worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.clock.sleep(self.poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "outbox batch failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.clock.sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::info!("outbox worker stopped");
    }

    /// Claim and dispatch one batch. Returns the number of events handled.
    pub async fn run_once(&self) -> Result<usize, xmaker_store::StoreError> {
        let now = self.clock.now();
        let batch = self.store.claim_pending(self.batch_size, now)?;
        let count = batch.len();
        for claimed in batch {
            self.dispatch(claimed.event).await;
        }
        Ok(count)
    }

    /// Drain the queue until it is empty or `deadline` passes. Used during
    /// graceful shutdown.
    pub async fn flush(&self, deadline: Duration) {
        let started = self.clock.now();
        loop {
            match self.run_once().await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "outbox flush failed");
                    break;
                }
            }
            if self.clock.now() - started > deadline.as_secs_f64() {
                tracing::warn!("outbox flush deadline reached with events remaining");
                break;
            }
        }
    }

    async fn dispatch(&self, event: OutboxEvent) {
        self.limiter.wait(1).await;

        tracing::debug!(
            event_id = %event.event_id,
            kind = %event.kind,
            aggregate_id = %event.aggregate_id,
            retry_count = event.retry_count,
            "dispatching outbox event"
        );

        let result = match event.kind {
            OutboxEventKind::SubmitOrder => self.dispatch_submit(&event).await,
            OutboxEventKind::CancelOrder => self.dispatch_cancel(&event).await,
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.store.complete_event(&event.event_id) {
                    tracing::error!(event_id = %event.event_id, error = %e, "complete mark failed");
                }
            }
            Err(err) if err.is_transient() => self.handle_transient(&event, &err),
            Err(err) => self.handle_terminal(&event, &err),
        }
    }

    async fn dispatch_submit(&self, event: &OutboxEvent) -> Result<(), VenueError> {
        let req = submit_from_payload(event);
        let ack = self.gateway.submit(&req).await?;
        self.oms.apply_ack(
            &OrderId::new(event.aggregate_id.clone()),
            VenueOrderId(ack.external_order_id),
        );
        Ok(())
    }

    async fn dispatch_cancel(&self, event: &OutboxEvent) -> Result<(), VenueError> {
        // Cancels carry the venue id when the order is ours; sweeps of
        // unregistered orders use the external id as the aggregate itself.
        let external = event
            .payload
            .get("external_order_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| event.aggregate_id.clone());

        self.gateway.cancel(&external).await?;

        let order_id = OrderId::new(event.aggregate_id.clone());
        if self.oms.get_order(&order_id).is_some() {
            self.oms.apply_cancel_confirmed(&order_id, "cancel confirmed");
        }
        Ok(())
    }

    fn handle_transient(&self, event: &OutboxEvent, err: &VenueError) {
        if event.retry_count + 1 >= self.retry.max_retries {
            tracing::error!(
                event_id = %event.event_id,
                aggregate_id = %event.aggregate_id,
                retries = event.retry_count + 1,
                error = %err,
                "outbox event dead-lettered"
            );
            if let Err(e) = self.store.dead_letter_event(&event.event_id, &err.to_string()) {
                tracing::error!(event_id = %event.event_id, error = %e, "dead-letter mark failed");
            }
            if event.kind == OutboxEventKind::SubmitOrder {
                self.oms.apply_failed(
                    &OrderId::new(event.aggregate_id.clone()),
                    "delivery retries exhausted",
                );
            }
            return;
        }

        let delay = self.retry.backoff(event.retry_count);
        let retry_at = self.clock.now() + delay.as_secs_f64();
        tracing::warn!(
            event_id = %event.event_id,
            retry_count = event.retry_count + 1,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "outbox event scheduled for retry"
        );
        if let Err(e) = self.store.retry_event(&event.event_id, &err.to_string(), retry_at) {
            tracing::error!(event_id = %event.event_id, error = %e, "retry mark failed");
        }
    }

    fn handle_terminal(&self, event: &OutboxEvent, err: &VenueError) {
        tracing::error!(
            event_id = %event.event_id,
            aggregate_id = %event.aggregate_id,
            error = %err,
            "outbox event terminally failed"
        );
        if let Err(e) = self.store.fail_event(&event.event_id, &err.to_string()) {
            tracing::error!(event_id = %event.event_id, error = %e, "fail mark failed");
        }
        if event.kind == OutboxEventKind::SubmitOrder {
            self.oms
                .apply_reject(&OrderId::new(event.aggregate_id.clone()), &err.to_string());
        }
    }
}

/// Decode a submit payload written by the OMS.
fn submit_from_payload(event: &OutboxEvent) -> GatewaySubmit {
    let p = &event.payload;
    GatewaySubmit {
        order_id: event.aggregate_id.clone(),
        symbol: p["symbol"].as_str().unwrap_or_default().to_string(),
        side: p["side"].as_str().unwrap_or_default().to_string(),
        order_type: p["order_type"].as_str().unwrap_or("limit").to_string(),
        price: p["price"].as_f64(),
        quantity: p["quantity"].as_f64().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use xmaker_core::clock::{Clock, ManualClock};
    use xmaker_core::config::{RiskConfig, TradingConfig};
    use xmaker_core::types::{OrderState, OrderType, Price, Quantity, Side, Symbol};
    use xmaker_execution::{GatewayAck, VenueOpenOrder};
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

    fn outbox_cfg() -> OutboxConfig {
        OutboxConfig {
            batch_size: 16,
            poll_ms: 10,
            max_retries: 5,
            retry_base_ms: 1000,
            retry_cap_ms: 60000,
            workers: 1,
        }
    }

    /// Gateway scripted to fail a given number of times before succeeding.
    struct ScriptedGateway {
        submit_failures: Mutex<Vec<VenueError>>,
        submits: Mutex<Vec<String>>,
        cancels: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(failures: Vec<VenueError>) -> Self {
            Self {
                submit_failures: Mutex::new(failures),
                submits: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
            }
        }

        fn submit_count(&self) -> usize {
            self.submits.lock().len()
        }
    }

    #[async_trait]
    impl VenueGateway for ScriptedGateway {
        async fn submit(&self, req: &GatewaySubmit) -> Result<GatewayAck, VenueError> {
            let mut failures = self.submit_failures.lock();
            if let Some(err) = failures.pop() {
                return Err(err);
            }
            self.submits.lock().push(req.order_id.clone());
            Ok(GatewayAck {
                external_order_id: format!("EXT-{}", req.order_id),
            })
        }

        async fn cancel(&self, external_order_id: &str) -> Result<(), VenueError> {
            self.cancels.lock().push(external_order_id.to_string());
            Ok(())
        }

        async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, VenueError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        worker: OutboxWorker,
        store: Arc<Store>,
        oms: Arc<Oms>,
        clock: Arc<ManualClock>,
        gateway: Arc<ScriptedGateway>,
    }

    fn fixture(failures: Vec<VenueError>) -> Fixture {
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
        let gateway = Arc::new(ScriptedGateway::new(failures));
        let worker = OutboxWorker::new(
            store.clone(),
            gateway.clone(),
            Arc::new(RateLimiter::new(100, 1000.0)),
            oms.clone(),
            clock.clone(),
            &outbox_cfg(),
        );
        Fixture {
            worker,
            store,
            oms,
            clock,
            gateway,
        }
    }

    fn transient() -> VenueError {
        VenueError::Transient {
            message: "gateway timeout".into(),
        }
    }

    fn submit_order(oms: &Oms) -> xmaker_core::types::Order {
        oms.submit(
            Symbol::new("ADAUSDM"),
            Side::Buy,
            OrderType::Limit,
            Quantity::from(100.0),
            Some(Price::from(0.4998)),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_dispatch_acks_order() {
        let f = fixture(vec![]);
        let order = submit_order(&f.oms);

        assert_eq!(f.worker.run_once().await.unwrap(), 1);

        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Working);
        assert_eq!(
            updated.external_order_id.unwrap().0,
            format!("EXT-{}", order.order_id)
        );
        assert_eq!(
            f.store
                .outbox_count(xmaker_core::types::OutboxStatus::Completed)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        // Three transient failures, then success: the order must reach
        // working exactly once with no duplicate submission after that.
        let f = fixture(vec![transient(), transient(), transient()]);
        let order = submit_order(&f.oms);

        for round in 0..4 {
            let n = f.worker.run_once().await.unwrap();
            assert_eq!(n, 1, "round {round} should dispatch one event");
            // Jump past any scheduled backoff.
            f.clock.advance(600.0);
        }

        assert_eq!(f.gateway.submit_count(), 1);
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Working
        );
        // Nothing left to dispatch.
        assert_eq!(f.worker.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_dead_letters() {
        let failures = vec![transient(); 5];
        let f = fixture(failures);
        let order = submit_order(&f.oms);

        for _ in 0..5 {
            f.worker.run_once().await.unwrap();
            f.clock.advance(600.0);
        }

        assert_eq!(
            f.store
                .outbox_count(xmaker_core::types::OutboxStatus::DeadLetter)
                .unwrap(),
            1
        );
        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Failed
        );
    }

    #[tokio::test]
    async fn test_terminal_failure_rejects_order() {
        let f = fixture(vec![VenueError::Terminal {
            status: 400,
            message: "price outside band".into(),
        }]);
        let order = submit_order(&f.oms);

        f.worker.run_once().await.unwrap();

        assert_eq!(
            f.store
                .outbox_count(xmaker_core::types::OutboxStatus::Failed)
                .unwrap(),
            1
        );
        let updated = f.oms.get_order(&order.order_id).unwrap();
        assert_eq!(updated.state, OrderState::Rejected);
        assert_eq!(f.gateway.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_dispatch_confirms() {
        let f = fixture(vec![]);
        let order = submit_order(&f.oms);

        // Submit reaches the venue and the order starts working.
        f.worker.run_once().await.unwrap();
        f.oms.request_cancel(&order.order_id, "requote").unwrap();
        f.clock.advance(1.0);
        f.worker.run_once().await.unwrap();

        assert_eq!(
            f.oms.get_order(&order.order_id).unwrap().state,
            OrderState::Cancelled
        );
        assert_eq!(
            f.gateway.cancels.lock().as_slice(),
            &[format!("EXT-{}", order.order_id)]
        );
    }

    #[tokio::test]
    async fn test_unregistered_cancel_uses_aggregate_id() {
        let f = fixture(vec![]);
        // Sweep-style event: no local order, aggregate is the venue id.
        let event = OutboxEvent::new(
            OutboxEventKind::CancelOrder,
            "VENUE-ORPHAN-1",
            serde_json::json!({ "reason": "unregistered order" }),
            f.clock.now(),
        );
        f.store.enqueue_event(&event).unwrap();

        f.worker.run_once().await.unwrap();

        assert_eq!(f.gateway.cancels.lock().as_slice(), &["VENUE-ORPHAN-1".to_string()]);
        assert_eq!(
            f.store
                .outbox_count(xmaker_core::types::OutboxStatus::Completed)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_flush_drains_queue() {
        let f = fixture(vec![]);
        submit_order(&f.oms);
        submit_order(&f.oms);

        f.worker.flush(Duration::from_secs(5)).await;
        assert_eq!(
            f.store
                .outbox_count(xmaker_core::types::OutboxStatus::Pending)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(60000),
        };
        for (n, expected_ms) in [(0u32, 1000u64), (1, 2000), (2, 4000), (3, 8000)] {
            let d = policy.backoff(n);
            let lo = Duration::from_millis(expected_ms * 8 / 10);
            let hi = Duration::from_millis(expected_ms * 12 / 10);
            assert!(d >= lo && d <= hi, "retry {n}: {d:?} outside [{lo:?}, {hi:?}]");
        }
        // Far past the cap.
        let capped = policy.backoff(30);
        assert!(capped <= Duration::from_millis(72_000));
    }
}
