//! Engine supervisor: builds every component from configuration, spawns
//! the task set, and coordinates graceful shutdown.
//!
//! Task set: one per stream client, the quote task driven by source
//! updates, a pool of outbox dispatchers, the reconciler, the cleanup
//! sweep, the status reporter, and a WAL checkpoint timer. Shutdown is
//! cooperative: new quote intake stops first, the outbox gets a bounded
//! grace period to flush, then everything is cancelled and a final
//! checkpoint persists state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use xmaker_core::clock::{SharedClock, SystemClock};
use xmaker_core::config::{AppConfig, Mode};
use xmaker_core::types::{BookTicker, Symbol};
use xmaker_execution::{
    DestClient, DestGateway, OperationKeySigner, PaperGateway, RateLimiter, VenueGateway,
};
use xmaker_oms::Oms;
use xmaker_outbox::OutboxWorker;
use xmaker_quote::{QuoteEngine, SkewGauge};
use xmaker_risk::EmergencyStop;
use xmaker_store::Store;
use xmaker_stream::{AccountStreamClient, SessionConfig, SourceTickerClient};

use crate::cleanup::CleanupTask;
use crate::pipeline::QuotePipeline;
use crate::reconciler::Reconciler;
use crate::status::StatusTask;

/// Quote-asset suffixes recognized when splitting a destination pair.
const QUOTE_SUFFIXES: &[&str] = &["USDM", "USDT", "USDC", "USD"];

/// Split a destination pair like "ADAUSDM" into (base, quote).
pub fn split_symbol(symbol: &str) -> (String, String) {
    for suffix in QUOTE_SUFFIXES {
        if let Some(base) = symbol.strip_suffix(suffix) {
            if !base.is_empty() {
                return (base.to_string(), suffix.to_string());
            }
        }
    }
    // Fall back to a 3-character base.
    let split = symbol.len().min(3);
    (symbol[..split].to_string(), symbol[split..].to_string())
}

/// The assembled engine.
pub struct Engine {
    cfg: AppConfig,
    clock: SharedClock,
    store: Arc<Store>,
    stop: Arc<EmergencyStop>,
    skew: Arc<SkewGauge>,
    oms: Arc<Oms>,
    gateway: Arc<dyn VenueGateway>,
    limiter: Arc<RateLimiter>,
    pipeline: Arc<QuotePipeline>,
}

impl Engine {
    /// Build the engine from configuration.
    pub fn new(cfg: AppConfig) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let store = Arc::new(
            Store::open(Path::new(&cfg.system.db_path)).context("failed to open store")?,
        );

        let (base_asset, quote_asset) = split_symbol(&cfg.trading.symbol_dst);
        tracing::info!(
            symbol_dst = %cfg.trading.symbol_dst,
            base_asset,
            quote_asset,
            "asset pair resolved"
        );

        let stop = Arc::new(EmergencyStop::new(cfg.risk.emergency_stop));
        let skew = Arc::new(SkewGauge::new(
            base_asset.clone(),
            quote_asset,
            cfg.trading.gamma_max,
            cfg.trading.target_asset_ratio,
            cfg.trading.ratio_tolerance,
        ));

        let oms = Arc::new(Oms::new(
            store.clone(),
            clock.clone(),
            cfg.trading.clone(),
            &cfg.risk,
            stop.clone(),
            base_asset,
        ));

        let gateway: Arc<dyn VenueGateway> = match cfg.system.mode {
            Mode::Paper => {
                tracing::info!("paper mode: orders acknowledged locally");
                Arc::new(PaperGateway::new())
            }
            Mode::Live => {
                let client = DestClient::new(
                    cfg.dest.rest_url.clone(),
                    cfg.dest.api_key.clone(),
                    Duration::from_millis(cfg.dest.connect_timeout_ms),
                    Duration::from_millis(cfg.dest.request_timeout_ms),
                )
                .context("failed to build venue client")?;
                let signer = Box::new(OperationKeySigner::new(&cfg.dest.operation_key));
                Arc::new(DestGateway::new(client, signer))
            }
        };

        let limiter = Arc::new(RateLimiter::new(
            cfg.system.rate_burst,
            cfg.system.max_orders_per_second,
        ));
        let pipeline = Arc::new(QuotePipeline::new(store.clone(), oms.clone()));

        Ok(Self {
            cfg,
            clock,
            store,
            stop,
            skew,
            oms,
            gateway,
            limiter,
            pipeline,
        })
    }

    /// Emergency stop handle (for an operator wrapper).
    pub fn emergency_stop(&self) -> Arc<EmergencyStop> {
        self.stop.clone()
    }

    /// Run until SIGINT.
    pub async fn run(self) -> Result<()> {
        // Recover state: orphaned in-flight outbox rows go back to pending,
        // and open orders repopulate the OMS index.
        let requeued = self.store.requeue_in_flight()?;
        if requeued > 0 {
            tracing::warn!(requeued, "requeued in-flight outbox events from previous run");
        }
        self.oms.recover()?;

        let cancel = CancellationToken::new();
        // Quote intake has its own token so shutdown can stop new
        // submissions while cancels and in-flight events still drain.
        let intake_cancel = CancellationToken::new();

        let (ticker_tx, ticker_rx) = watch::channel::<Option<BookTicker>>(None);
        let (account_tx, account_rx) = mpsc::channel(1024);

        // ── Source market data ──────────────────────────────────────
        let source = SourceTickerClient::new(
            self.cfg.source.ws_url.clone(),
            self.cfg.trading.symbol_src.clone(),
            SessionConfig::from_reconnect(
                &self.cfg.source.reconnect,
                Duration::from_millis(self.cfg.trading.stale_ms),
            ),
            self.clock.clone(),
            ticker_tx,
        );
        let source_cancel = intake_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = source.run(source_cancel).await {
                tracing::error!(error = %e, "source stream terminated");
            }
        });

        // ── Destination account stream ──────────────────────────────
        let account = AccountStreamClient::new(
            self.cfg.dest.ws_url.clone(),
            self.cfg.dest.api_key.clone(),
            SessionConfig::from_reconnect(
                &self.cfg.dest.reconnect,
                Duration::from_millis(self.cfg.dest.account_idle_timeout_ms),
            ),
            self.clock.clone(),
            account_tx,
        );
        let account_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = account.run(account_cancel).await {
                tracing::error!(error = %e, "account stream terminated");
            }
        });

        // ── Reconciler ──────────────────────────────────────────────
        let (base_asset, quote_asset) = split_symbol(&self.cfg.trading.symbol_dst);
        let reconciler = Reconciler::new(
            self.store.clone(),
            self.oms.clone(),
            self.skew.clone(),
            self.clock.clone(),
            ticker_rx.clone(),
            base_asset,
            quote_asset,
        );
        let reconciler_cancel = cancel.clone();
        tokio::spawn(async move {
            reconciler.run(account_rx, reconciler_cancel).await;
        });

        // ── Quote task ──────────────────────────────────────────────
        let quote_task_cancel = intake_cancel.clone();
        let quote_engine = QuoteEngine::new(self.cfg.trading.clone());
        let quote_pipeline = self.pipeline.clone();
        let quote_skew = self.skew.clone();
        let quote_clock = self.clock.clone();
        let mut quote_rx = ticker_rx.clone();
        tokio::spawn(async move {
            run_quote_task(
                quote_engine,
                quote_pipeline,
                quote_skew,
                quote_clock,
                &mut quote_rx,
                quote_task_cancel,
            )
            .await;
        });

        // ── Outbox dispatchers ──────────────────────────────────────
        let worker = Arc::new(OutboxWorker::new(
            self.store.clone(),
            self.gateway.clone(),
            self.limiter.clone(),
            self.oms.clone(),
            self.clock.clone(),
            &self.cfg.outbox,
        ));
        for _ in 0..self.cfg.outbox.workers.max(1) {
            let worker = worker.clone();
            let worker_cancel = cancel.clone();
            tokio::spawn(async move {
                worker.run(worker_cancel).await;
            });
        }

        // ── Cleanup sweep ───────────────────────────────────────────
        let cleanup = CleanupTask::new(
            self.store.clone(),
            self.oms.clone(),
            self.gateway.clone(),
            self.clock.clone(),
            Duration::from_millis(self.cfg.system.cleanup_interval_ms),
        );
        let cleanup_cancel = cancel.clone();
        tokio::spawn(async move {
            cleanup.run(cleanup_cancel).await;
        });

        // ── Status report ───────────────────────────────────────────
        let status = StatusTask::new(
            self.store.clone(),
            self.oms.clone(),
            self.skew.clone(),
            self.limiter.clone(),
            self.pipeline.clone(),
            self.clock.clone(),
            ticker_rx,
            Symbol::new(self.cfg.trading.symbol_dst.clone()),
            Duration::from_millis(self.cfg.system.status_interval_ms),
        );
        let status_cancel = cancel.clone();
        tokio::spawn(async move {
            status.run(status_cancel).await;
        });

        // ── WAL checkpoint timer ────────────────────────────────────
        let checkpoint_store = self.store.clone();
        let checkpoint_clock = self.clock.clone();
        let checkpoint_interval = Duration::from_millis(self.cfg.system.wal_checkpoint_ms);
        let checkpoint_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = checkpoint_cancel.cancelled() => break,
                    _ = checkpoint_clock.sleep(checkpoint_interval) => {}
                }
                if let Err(e) = checkpoint_store.wal_checkpoint() {
                    tracing::error!(error = %e, "WAL checkpoint failed");
                }
            }
        });

        tracing::info!(
            mode = ?self.cfg.system.mode,
            symbol_src = %self.cfg.trading.symbol_src,
            symbol_dst = %self.cfg.trading.symbol_dst,
            layers = self.cfg.trading.num_layers,
            "engine running"
        );

        // ── Shutdown ────────────────────────────────────────────────
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = cancel.cancelled() => {
                tracing::info!("cancellation requested");
            }
        }

        // Stop new quote intake, give the outbox a bounded flush window,
        // then stop everything and checkpoint.
        intake_cancel.cancel();
        worker
            .flush(Duration::from_millis(self.cfg.system.shutdown_grace_ms))
            .await;
        cancel.cancel();
        self.store.wal_checkpoint()?;

        tracing::info!("engine stopped");
        Ok(())
    }
}

/// React to each fresh source tick: derive a quote at the current skew and
/// hand it to the pipeline.
async fn run_quote_task(
    mut engine: QuoteEngine,
    pipeline: Arc<QuotePipeline>,
    skew: Arc<SkewGauge>,
    clock: SharedClock,
    ticker_rx: &mut watch::Receiver<Option<BookTicker>>,
    cancel: CancellationToken,
) {
    tracing::info!("quote task started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = ticker_rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("source ticker channel closed");
                    break;
                }
            }
        }

        let Some(ticker) = ticker_rx.borrow_and_update().clone() else {
            continue;
        };

        let gamma = skew.gamma();
        match engine.generate(&ticker, gamma, clock.now()) {
            Ok(Some(quote)) => {
                if let Err(e) = pipeline.process(quote) {
                    tracing::error!(error = %e, "quote pipeline failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "invalid source tick skipped");
            }
        }
    }
    tracing::info!("quote task stopped");
}
