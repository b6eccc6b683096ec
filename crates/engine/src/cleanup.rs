//! Periodic cleanup: quote expiry and the unregistered-order sweep.
//!
//! The sweep is the outer loop of the convergence guarantee: anything
//! resting on the venue whose id the store does not know gets a cancel
//! enqueued, so a crashed run or a fat-fingered manual order cannot leave
//! stray liquidity behind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;
use xmaker_core::types::{OutboxEvent, OutboxEventKind};
use xmaker_execution::VenueGateway;
use xmaker_oms::Oms;
use xmaker_store::Store;

/// Completed outbox rows older than this are purged, and fill dedup
/// entries pruned, on each sweep.
const RETENTION_SECS: f64 = 24.0 * 3600.0;

/// Periodic maintenance task.
pub struct CleanupTask {
    store: Arc<Store>,
    oms: Arc<Oms>,
    gateway: Arc<dyn VenueGateway>,
    clock: SharedClock,
    interval: Duration,
}

impl CleanupTask {
    /// Wire a cleanup task.
    pub fn new(
        store: Arc<Store>,
        oms: Arc<Oms>,
        gateway: Arc<dyn VenueGateway>,
        clock: SharedClock,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            oms,
            gateway,
            clock,
            interval,
        }
    }

    /// Run until cancelled, sweeping once per interval.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "cleanup task started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {}
            }
            self.sweep_once().await;
        }
        tracing::info!("cleanup task stopped");
    }

    /// One full sweep. Public so tests can drive it directly.
    pub async fn sweep_once(&self) {
        let now = self.clock.now();

        match self.store.expire_quotes(now) {
            Ok(0) => {}
            Ok(n) => tracing::info!(expired = n, "stale quotes expired"),
            Err(e) => tracing::error!(error = %e, "quote expiry failed"),
        }

        if let Err(e) = self.sweep_unregistered().await {
            tracing::error!(error = %e, "unregistered order sweep failed");
        }

        match self.store.purge_completed(now - RETENTION_SECS) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "completed outbox events purged"),
            Err(e) => tracing::error!(error = %e, "outbox purge failed"),
        }
        self.oms.prune_dedup(RETENTION_SECS);
    }

    /// Compare venue open orders against the store and enqueue cancels for
    /// every order we do not own. Returns the number of cancels enqueued.
    pub async fn sweep_unregistered(&self) -> anyhow::Result<u32> {
        let venue_orders = self
            .gateway
            .open_orders()
            .await
            .map_err(|e| anyhow::anyhow!("venue open-order query failed: {e}"))?;
        if venue_orders.is_empty() {
            return Ok(0);
        }

        let known: HashSet<String> = self.store.known_external_ids()?.into_iter().collect();
        let now = self.clock.now();

        let mut enqueued = 0u32;
        for order in venue_orders {
            if known.contains(&order.order_id) {
                continue;
            }
            if self
                .store
                .live_events_for_aggregate(&order.order_id, OutboxEventKind::CancelOrder)?
                > 0
            {
                continue;
            }

            tracing::warn!(
                external_order_id = %order.order_id,
                symbol = %order.symbol,
                side = %order.side,
                price = order.price,
                quantity = order.quantity,
                "unregistered order on venue, enqueueing cancel"
            );
            let event = OutboxEvent::new(
                OutboxEventKind::CancelOrder,
                order.order_id.clone(),
                serde_json::json!({
                    "external_order_id": order.order_id,
                    "reason": "unregistered order sweep",
                }),
                now,
            );
            self.store.enqueue_event(&event)?;
            enqueued += 1;
        }

        if enqueued > 0 {
            tracing::info!(enqueued, "unregistered order sweep complete");
        }
        Ok(enqueued)
    }
}
