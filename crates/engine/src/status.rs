//! Periodic status report.
//!
//! One structured log line per interval summarizing the book, inventory,
//! P&L, outbox depth, and rate-limiter headroom. This is the operator's
//! heartbeat; a missing status line is itself a signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;
use xmaker_core::types::{BookTicker, OutboxStatus, Price, Symbol};
use xmaker_execution::RateLimiter;
use xmaker_oms::Oms;
use xmaker_quote::SkewGauge;
use xmaker_store::Store;

use crate::pipeline::QuotePipeline;

/// Periodic status reporting task.
pub struct StatusTask {
    store: Arc<Store>,
    oms: Arc<Oms>,
    skew: Arc<SkewGauge>,
    limiter: Arc<RateLimiter>,
    pipeline: Arc<QuotePipeline>,
    clock: SharedClock,
    reference: watch::Receiver<Option<BookTicker>>,
    symbol_dst: Symbol,
    interval: Duration,
}

impl StatusTask {
    /// Wire a status task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        oms: Arc<Oms>,
        skew: Arc<SkewGauge>,
        limiter: Arc<RateLimiter>,
        pipeline: Arc<QuotePipeline>,
        clock: SharedClock,
        reference: watch::Receiver<Option<BookTicker>>,
        symbol_dst: Symbol,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            oms,
            skew,
            limiter,
            pipeline,
            clock,
            reference,
            symbol_dst,
            interval,
        }
    }

    /// Run until cancelled, reporting once per interval.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {}
            }
            self.report();
        }
    }

    /// Emit one status line.
    pub fn report(&self) {
        let now = self.clock.now();
        let mark = self.reference.borrow().as_ref().map(|t| t.mid());

        let position = self.oms.position(&self.symbol_dst);
        let (net_qty, realized) = position
            .as_ref()
            .map(|p| (p.quantity.to_f64(), p.realized_pnl.to_f64()))
            .unwrap_or((0.0, 0.0));
        let unrealized = mark
            .map(|m| self.oms.unrealized_pnl(&self.symbol_dst, Price::from(m)))
            .unwrap_or(0.0);

        let outbox_pending = self
            .store
            .outbox_count(OutboxStatus::Pending)
            .unwrap_or_default();
        let outbox_dead = self
            .store
            .outbox_count(OutboxStatus::DeadLetter)
            .unwrap_or_default();
        let limiter = self.limiter.status();
        let stats = self.pipeline.stats();

        tracing::info!(
            symbol = %self.symbol_dst,
            mark = ?mark,
            open_orders = self.oms.open_order_count(),
            net_position = net_qty,
            realized_pnl = realized,
            unrealized_pnl = unrealized,
            daily_pnl = self.oms.daily_realized_pnl(now),
            gamma = self.skew.gamma(),
            ratio_ok = ?self.skew.within_tolerance(),
            outbox_pending,
            outbox_dead,
            rate_utilization = limiter.utilization,
            quotes = stats.quotes,
            orders_submitted = stats.submitted,
            orders_cancelled = stats.cancelled,
            "status"
        );

        if outbox_dead > 0 {
            tracing::warn!(outbox_dead, "dead-lettered outbox events need attention");
        }
    }
}
