//! Layered configuration for the xmaker engine.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (staging URLs, conservative risk parameters)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `XMAKER_`, nested with `__`)
//! 4. Dedicated env vars for credentials (`DEST_API_KEY`, `DEST_OPERATION_KEY`)
//!
//! API credentials **must** come from environment variables, never from
//! configuration files, to prevent accidental check-in of secrets.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Quote derivation and inventory-skew parameters.
    pub trading: TradingConfig,
    /// Pre-trade risk limits.
    pub risk: RiskConfig,
    /// Source venue (reference market data) connection.
    pub source: SourceConfig,
    /// Destination venue (order placement) connection.
    pub dest: DestConfig,
    /// Outbox dispatcher tuning.
    pub outbox: OutboxConfig,
    /// Operational settings: persistence, rate limits, task cadences.
    pub system: SystemConfig,
}

/// Quote derivation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Source-venue pair the reference BBO comes from.
    pub symbol_src: String,
    /// Destination-venue pair being quoted.
    pub symbol_dst: String,
    /// First-layer half-spread from the reference mid, basis points.
    pub base_spread_bps: f64,
    /// Incremental spread between consecutive layers, basis points.
    pub tick_spread_bps: f64,
    /// Number of layers quoted per enabled side.
    pub num_layers: u32,
    /// Total quote-asset notional distributed across all layers of a side.
    pub total_liquidity: f64,
    /// Per-layer notional growth factor (0.0 = flat ladder).
    pub layer_liquidity_multiplier: f64,
    /// Hard floor on the half-spread after skew adjustment, basis points.
    pub min_edge_bps: f64,
    /// Lower clamp bound on the skewed half-spread, basis points.
    pub min_half_spread_bps: f64,
    /// Upper clamp bound on the skewed half-spread, basis points.
    pub max_half_spread_bps: f64,
    /// Lower clamp bound on the skew size multiplier.
    pub size_mult_min: f64,
    /// Upper clamp bound on the skew size multiplier.
    pub size_mult_max: f64,
    /// Spread response to inventory skew (bps per unit of gamma).
    pub skew_spread_gain: f64,
    /// Size response to inventory skew (fraction per unit of gamma).
    pub skew_size_gain: f64,
    /// Cap on the absolute inventory skew gamma.
    pub gamma_max: f64,
    /// Target quote:base asset value ratio (1.0 = balanced).
    pub target_asset_ratio: f64,
    /// Acceptable relative deviation from the target ratio.
    pub ratio_tolerance: f64,
    /// Minimum time between emitted quotes, milliseconds.
    pub min_requote_ms: u64,
    /// Minimum absolute reference price move to trigger a requote.
    pub requote_tick_threshold: f64,
    /// Age beyond which a source snapshot is considered stale, milliseconds.
    pub stale_ms: u64,
    /// Quote time-to-live before the cleanup task expires it, milliseconds.
    pub quote_ttl_ms: u64,
    /// Minimum order size accepted by the engine (base units).
    pub min_quote_size: f64,
    /// Destination price tick (smallest price increment).
    pub price_tick: f64,
    /// Destination quantity step (smallest size increment).
    pub qty_step: f64,
    /// Which sides to quote: any subset of {"bid", "ask"}.
    pub sides: Vec<String>,
}

impl TradingConfig {
    /// Returns `true` if `side` ("bid" or "ask") is enabled.
    pub fn side_enabled(&self, side: &str) -> bool {
        self.sides.iter().any(|s| s.eq_ignore_ascii_case(side))
    }
}

/// Pre-trade risk limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum absolute position per symbol, base units.
    pub max_position_size: f64,
    /// Maximum daily realized loss, quote units.
    pub max_daily_loss: f64,
    /// Maximum number of non-terminal orders.
    pub max_open_orders: u32,
    /// Maximum projected directional exposure, base units.
    pub max_skew: f64,
    /// Start with the emergency stop engaged.
    pub emergency_stop: bool,
}

/// Source venue connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// WebSocket base URL for the book-ticker stream.
    pub ws_url: String,
    /// Reconnect parameters.
    pub reconnect: ReconnectConfig,
}

/// Destination venue connection settings.
///
/// `api_key` and `operation_key` are loaded from env vars only; the
/// `#[serde(default)]` annotations keep them out of TOML deserialization
/// requirements.
#[derive(Debug, Clone, Deserialize)]
pub struct DestConfig {
    /// REST base URL for order operations.
    pub rest_url: String,
    /// WebSocket base URL for the account stream.
    pub ws_url: String,
    /// API key — loaded from `DEST_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Operation (signing) key — loaded from `DEST_OPERATION_KEY`.
    #[serde(default)]
    pub operation_key: String,
    /// TCP connect timeout, milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request timeout, milliseconds.
    pub request_timeout_ms: u64,
    /// Account-stream idle window before a forced reconnect, milliseconds.
    pub account_idle_timeout_ms: u64,
    /// Reconnect parameters.
    pub reconnect: ReconnectConfig,
}

/// WebSocket reconnect parameters with exponential backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Initial backoff delay, milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay, milliseconds.
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before the client surfaces failure
    /// (0 = retry forever).
    pub max_retries: u32,
    /// Proactive reconnect before the venue's session lifetime, minutes.
    pub session_max_age_min: u64,
}

/// Outbox dispatcher tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Events claimed per poll.
    pub batch_size: u32,
    /// Poll interval when the queue is empty, milliseconds.
    pub poll_ms: u64,
    /// Delivery attempts before an event is dead-lettered.
    pub max_retries: u32,
    /// Base retry delay, milliseconds (doubled per attempt).
    pub retry_base_ms: u64,
    /// Retry delay cap, milliseconds.
    pub retry_cap_ms: u64,
    /// Number of dispatcher tasks.
    pub workers: u32,
}

/// Operational settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Trading mode: paper (no signing key required) or live.
    pub mode: Mode,
    /// SQLite database path.
    pub db_path: String,
    /// Token-bucket burst capacity for outbound order traffic.
    pub rate_burst: u32,
    /// Sustained outbound order rate, per second.
    pub max_orders_per_second: f64,
    /// Status report interval, milliseconds.
    pub status_interval_ms: u64,
    /// Cleanup sweep interval (quote expiry + unregistered orders), ms.
    pub cleanup_interval_ms: u64,
    /// WAL checkpoint interval, milliseconds.
    pub wal_checkpoint_ms: u64,
    /// Grace period for flushing the outbox on shutdown, milliseconds.
    pub shutdown_grace_ms: u64,
}

/// Trading mode selector.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Orders are built and logged but the gateway never signs or submits.
    Paper,
    /// Real order flow against the destination venue.
    Live,
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment overrides with prefix `XMAKER_` and `__` nesting
    ///    (e.g., `XMAKER_RISK__MAX_OPEN_ORDERS=25`).
    /// 4. Credentials from `DEST_API_KEY` / `DEST_OPERATION_KEY`.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            // Trading
            .set_default("trading.symbol_src", "ADAUSDT")?
            .set_default("trading.symbol_dst", "ADAUSDM")?
            .set_default("trading.base_spread_bps", 8.0)?
            .set_default("trading.tick_spread_bps", 10.0)?
            .set_default("trading.num_layers", 10i64)?
            .set_default("trading.total_liquidity", 5000.0)?
            .set_default("trading.layer_liquidity_multiplier", 1.0)?
            .set_default("trading.min_edge_bps", 1.0)?
            .set_default("trading.min_half_spread_bps", 1.0)?
            .set_default("trading.max_half_spread_bps", 50.0)?
            .set_default("trading.size_mult_min", 0.1)?
            .set_default("trading.size_mult_max", 3.0)?
            .set_default("trading.skew_spread_gain", 10.0)?
            .set_default("trading.skew_size_gain", 0.8)?
            .set_default("trading.gamma_max", 0.5)?
            .set_default("trading.target_asset_ratio", 1.0)?
            .set_default("trading.ratio_tolerance", 0.1)?
            .set_default("trading.min_requote_ms", 100i64)?
            .set_default("trading.requote_tick_threshold", 0.0001)?
            .set_default("trading.stale_ms", 5000i64)?
            .set_default("trading.quote_ttl_ms", 2000i64)?
            .set_default("trading.min_quote_size", 10.0)?
            .set_default("trading.price_tick", 0.0001)?
            .set_default("trading.qty_step", 1.0)?
            .set_default("trading.sides", vec!["bid", "ask"])?
            // Risk (conservative defaults)
            .set_default("risk.max_position_size", 5000.0)?
            .set_default("risk.max_daily_loss", 1000.0)?
            .set_default("risk.max_open_orders", 50i64)?
            .set_default("risk.max_skew", 2000.0)?
            .set_default("risk.emergency_stop", false)?
            // Source venue
            .set_default("source.ws_url", "wss://stream.binance.com:9443/ws")?
            .set_default("source.reconnect.initial_backoff_ms", 2000i64)?
            .set_default("source.reconnect.max_backoff_ms", 60000i64)?
            .set_default("source.reconnect.max_retries", 0i64)?
            .set_default("source.reconnect.session_max_age_min", 1380i64)?
            // Destination venue
            .set_default("dest.rest_url", "https://api-staging.deltadefi.io")?
            .set_default("dest.ws_url", "wss://stream-staging.deltadefi.io")?
            .set_default("dest.connect_timeout_ms", 5000i64)?
            .set_default("dest.request_timeout_ms", 10000i64)?
            .set_default("dest.account_idle_timeout_ms", 180000i64)?
            .set_default("dest.reconnect.initial_backoff_ms", 2000i64)?
            .set_default("dest.reconnect.max_backoff_ms", 60000i64)?
            .set_default("dest.reconnect.max_retries", 0i64)?
            .set_default("dest.reconnect.session_max_age_min", 1380i64)?
            // Outbox
            .set_default("outbox.batch_size", 16i64)?
            .set_default("outbox.poll_ms", 250i64)?
            .set_default("outbox.max_retries", 5i64)?
            .set_default("outbox.retry_base_ms", 1000i64)?
            .set_default("outbox.retry_cap_ms", 60000i64)?
            .set_default("outbox.workers", 2i64)?
            // System
            .set_default("system.mode", "paper")?
            .set_default("system.db_path", "xmaker.db")?
            .set_default("system.rate_burst", 5i64)?
            .set_default("system.max_orders_per_second", 5.0)?
            .set_default("system.status_interval_ms", 30000i64)?
            .set_default("system.cleanup_interval_ms", 30000i64)?
            .set_default("system.wal_checkpoint_ms", 300000i64)?
            .set_default("system.shutdown_grace_ms", 5000i64)?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (XMAKER_ prefix) ────────────
        // The prefix separator must be set explicitly to `_` because the
        // `config` crate defaults it to the nesting separator when one is
        // provided. Without this, `XMAKER_RISK__MAX_OPEN_ORDERS` would be
        // matched against prefix `xmaker__` instead of `xmaker_`.
        builder = builder.add_source(
            Environment::with_prefix("XMAKER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // ── Layer 4: dedicated credential env vars ─────────────────
        if let Ok(v) = std::env::var("DEST_API_KEY") {
            cfg.dest.api_key = v;
        }
        if let Ok(v) = std::env::var("DEST_OPERATION_KEY") {
            cfg.dest.operation_key = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        if self.system.mode == Mode::Live {
            if self.dest.api_key.is_empty() {
                bail!("DEST_API_KEY is required in live mode");
            }
            if self.dest.operation_key.is_empty() {
                bail!("DEST_OPERATION_KEY is required in live mode");
            }
        }
        if self.trading.num_layers == 0 {
            bail!("trading.num_layers must be at least 1");
        }
        if self.trading.price_tick <= 0.0 || self.trading.qty_step <= 0.0 {
            bail!("trading.price_tick and trading.qty_step must be positive");
        }
        if self.trading.min_half_spread_bps > self.trading.max_half_spread_bps {
            bail!("trading.min_half_spread_bps exceeds max_half_spread_bps");
        }
        if self.system.max_orders_per_second <= 0.0 {
            bail!("system.max_orders_per_second must be positive");
        }
        for side in &self.trading.sides {
            if !side.eq_ignore_ascii_case("bid") && !side.eq_ignore_ascii_case("ask") {
                bail!("trading.sides entries must be 'bid' or 'ask', got '{side}'");
            }
        }
        Ok(())
    }
}
