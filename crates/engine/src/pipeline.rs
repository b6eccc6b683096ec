//! Quote→order pipeline.
//!
//! Turns each emitted [`Quote`] into OMS submissions using diff-based
//! replacement: live orders whose price level is still quoted are left
//! alone, levels that disappeared are cancelled, and only genuinely new
//! levels are submitted. A quote whose layer prices match the live book
//! therefore produces zero order churn.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use xmaker_core::types::{OrderType, Price, Quote, QuoteStatus, Side};
use xmaker_oms::{Oms, OmsError};
use xmaker_store::Store;

/// Pipeline counters for status reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    /// Quotes processed.
    pub quotes: u64,
    /// Orders submitted.
    pub submitted: u64,
    /// Orders cancelled by the diff.
    pub cancelled: u64,
    /// Levels kept untouched by the diff.
    pub kept: u64,
    /// Submissions rejected by risk.
    pub rejected: u64,
}

/// Persists quotes and maintains the live order book against them.
pub struct QuotePipeline {
    store: Arc<Store>,
    oms: Arc<Oms>,
    stats: Mutex<PipelineStats>,
}

impl QuotePipeline {
    /// Wire a pipeline.
    pub fn new(store: Arc<Store>, oms: Arc<Oms>) -> Self {
        Self {
            store,
            oms,
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    /// Process one quote: persist it, diff against the live book, cancel
    /// stale levels, submit new ones.
    pub fn process(&self, mut quote: Quote) -> Result<(), OmsError> {
        quote.status = QuoteStatus::Persisted;
        self.store.insert_quote(&quote)?;

        let desired: Vec<(Side, Price, xmaker_core::types::Quantity)> = quote
            .bid_layers
            .iter()
            .map(|l| (Side::Buy, l.price, l.quantity))
            .chain(
                quote
                    .ask_layers
                    .iter()
                    .map(|l| (Side::Sell, l.price, l.quantity)),
            )
            .collect();
        let desired_levels: HashSet<(Side, Price)> =
            desired.iter().map(|(s, p, _)| (*s, *p)).collect();

        let live = self.oms.open_orders(&quote.symbol_dst);
        let mut live_levels: HashSet<(Side, Price)> = HashSet::new();

        let mut cancelled = 0u64;
        let mut kept = 0u64;
        for order in &live {
            let Some(price) = order.price else {
                continue;
            };
            if desired_levels.contains(&(order.side, price)) {
                live_levels.insert((order.side, price));
                kept += 1;
            } else {
                self.oms.request_cancel(&order.order_id, "level no longer quoted")?;
                cancelled += 1;
            }
        }

        let mut submitted = 0u64;
        let mut rejected = 0u64;
        for (side, price, quantity) in desired {
            if live_levels.contains(&(side, price)) {
                continue;
            }
            match self.oms.submit(
                quote.symbol_dst.clone(),
                side,
                OrderType::Limit,
                quantity,
                Some(price),
                Some(quote.quote_id.clone()),
            ) {
                Ok(_) => submitted += 1,
                Err(OmsError::Risk(rejection)) => {
                    // Risk can veto individual layers (skew, open-order
                    // budget); the rest of the quote still goes out.
                    tracing::warn!(
                        quote_id = %quote.quote_id,
                        side = %side,
                        price = %price,
                        violations = rejection.violations.len(),
                        "layer rejected by risk"
                    );
                    rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.store
            .update_quote_status(&quote.quote_id, QuoteStatus::OrdersCreated)?;
        if submitted > 0 || cancelled > 0 {
            self.store
                .update_quote_status(&quote.quote_id, QuoteStatus::OrdersSubmitted)?;
        }

        let mut stats = self.stats.lock();
        stats.quotes += 1;
        stats.submitted += submitted;
        stats.cancelled += cancelled;
        stats.kept += kept;
        stats.rejected += rejected;

        tracing::info!(
            quote_id = %quote.quote_id,
            submitted,
            cancelled,
            kept,
            rejected,
            "quote processed"
        );
        Ok(())
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock()
    }
}
