//! Layered quote derivation.
//!
//! The engine is a pure transformation of (reference BBO, inventory skew,
//! config) into a [`Quote`]. It keeps only the state needed for requote
//! gating: the time of the last emitted quote and the reference prices it
//! was derived from.
//!
//! Skew convention: positive gamma means quote-asset-heavy inventory, so
//! the bid side (buying base) quotes tighter and larger while the ask side
//! quotes wider and smaller.

use thiserror::Error;
use uuid::Uuid;

use xmaker_core::config::TradingConfig;
use xmaker_core::types::{
    BookTicker, Price, Quantity, Quote, QuoteLayer, QuoteStatus, Symbol, TickerError,
};

/// Quote derivation failure.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// The source snapshot violates the top-of-book invariant.
    #[error("invalid ticker: {0}")]
    InvalidTicker(#[from] TickerError),
}

/// Quote engine with requote-gating state.
pub struct QuoteEngine {
    cfg: TradingConfig,
    price_tick: Price,
    qty_step: Quantity,
    last_quote_ts: f64,
    last_source: Option<BookTicker>,
}

impl QuoteEngine {
    /// Create an engine from the trading configuration.
    pub fn new(cfg: TradingConfig) -> Self {
        let price_tick = Price::from(cfg.price_tick);
        let qty_step = Quantity::from(cfg.qty_step);
        Self {
            cfg,
            price_tick,
            qty_step,
            last_quote_ts: 0.0,
            last_source: None,
        }
    }

    /// Derive a quote from `ticker` at inventory skew `gamma`.
    ///
    /// Returns `Ok(None)` when the engine declines to requote: stale data,
    /// inside the minimum requote interval, reference prices unmoved, or
    /// every derived layer rounded away to nothing.
    pub fn generate(
        &mut self,
        ticker: &BookTicker,
        gamma: f64,
        now: f64,
    ) -> Result<Option<Quote>, QuoteError> {
        ticker.validate()?;

        if ticker.is_stale(now, self.cfg.stale_ms) {
            tracing::warn!(
                age_ms = (now - ticker.ts) * 1000.0,
                "source data stale, skipping quote"
            );
            return Ok(None);
        }

        if self.should_skip_requote(ticker, now) {
            return Ok(None);
        }

        let gamma = gamma.clamp(-self.cfg.gamma_max, self.cfg.gamma_max);
        let mid = ticker.mid();

        let (s_bid, s_ask) = self.half_spreads(gamma);
        let (m_bid, m_ask) = self.size_multipliers(gamma);

        let mut bid_layers = self.build_side(mid, s_bid, m_bid, SideOfBook::Bid);
        let mut ask_layers = self.build_side(mid, s_ask, m_ask, SideOfBook::Ask);

        // Don't-cross guard. Spreads are positive so this only fires on
        // numerical edges; widen both sides symmetrically and rebuild.
        if let (Some(best_bid), Some(best_ask)) = (bid_layers.first(), ask_layers.first()) {
            if best_bid.price >= best_ask.price {
                let widen = self.cfg.base_spread_bps / 2.0;
                tracing::warn!(
                    bid = %best_bid.price,
                    ask = %best_ask.price,
                    widen_bps = widen,
                    "derived layers crossed, widening symmetrically"
                );
                bid_layers = self.build_side(mid, s_bid + widen, m_bid, SideOfBook::Bid);
                ask_layers = self.build_side(mid, s_ask + widen, m_ask, SideOfBook::Ask);
                if let (Some(b), Some(a)) = (bid_layers.first(), ask_layers.first()) {
                    if b.price >= a.price {
                        return Ok(None);
                    }
                }
            }
        }

        if bid_layers.is_empty() && ask_layers.is_empty() {
            return Ok(None);
        }

        self.last_quote_ts = now;
        self.last_source = Some(ticker.clone());

        let mut quote = Quote {
            quote_id: Uuid::new_v4().to_string(),
            ts: now,
            symbol_src: Symbol::new(self.cfg.symbol_src.clone()),
            symbol_dst: Symbol::new(self.cfg.symbol_dst.clone()),
            source: ticker.clone(),
            bid_layers,
            ask_layers,
            spread_bps: None,
            status: QuoteStatus::Generated,
            expires_at: now + self.cfg.quote_ttl_ms as f64 / 1000.0,
        };
        quote.spread_bps = quote.compute_spread_bps();

        tracing::debug!(
            quote_id = %quote.quote_id,
            bid_layers = quote.bid_layers.len(),
            ask_layers = quote.ask_layers.len(),
            spread_bps = ?quote.spread_bps,
            gamma,
            "quote generated"
        );

        Ok(Some(quote))
    }

    /// Half-spreads in bps: `max(clamp(base ∓ λγ, s_min, s_max), min_edge)`.
    fn half_spreads(&self, gamma: f64) -> (f64, f64) {
        let base = self.cfg.base_spread_bps;
        let tilt = self.cfg.skew_spread_gain * gamma;
        let lo = self.cfg.min_half_spread_bps;
        let hi = self.cfg.max_half_spread_bps;
        let s_bid = (base - tilt).clamp(lo, hi).max(self.cfg.min_edge_bps);
        let s_ask = (base + tilt).clamp(lo, hi).max(self.cfg.min_edge_bps);
        (s_bid, s_ask)
    }

    /// Size multipliers: `clamp(1 ± μγ, m_min, m_max)`.
    fn size_multipliers(&self, gamma: f64) -> (f64, f64) {
        let tilt = self.cfg.skew_size_gain * gamma;
        let lo = self.cfg.size_mult_min;
        let hi = self.cfg.size_mult_max;
        ((1.0 + tilt).clamp(lo, hi), (1.0 - tilt).clamp(lo, hi))
    }

    /// Build one side's layers. Layers whose size rounds below the minimum
    /// quote size are dropped.
    fn build_side(
        &self,
        mid: f64,
        half_spread_bps: f64,
        size_mult: f64,
        side: SideOfBook,
    ) -> Vec<QuoteLayer> {
        let enabled = match side {
            SideOfBook::Bid => self.cfg.side_enabled("bid"),
            SideOfBook::Ask => self.cfg.side_enabled("ask"),
        };
        if !enabled {
            return Vec::new();
        }

        let num_layers = self.cfg.num_layers;
        let base_notional = self.cfg.total_liquidity / num_layers as f64;
        let mut layers = Vec::with_capacity(num_layers as usize);

        for i in 0..num_layers {
            let total_bps = half_spread_bps + i as f64 * self.cfg.tick_spread_bps;
            let raw = match side {
                SideOfBook::Bid => mid * (1.0 - total_bps / 10_000.0),
                SideOfBook::Ask => mid * (1.0 + total_bps / 10_000.0),
            };
            let price = match side {
                SideOfBook::Bid => Price::from(raw).floor_to_tick(self.price_tick),
                SideOfBook::Ask => Price::from(raw).ceil_to_tick(self.price_tick),
            };
            if !price.is_positive() {
                continue;
            }

            let notional =
                base_notional * (1.0 + i as f64 * self.cfg.layer_liquidity_multiplier);
            let raw_qty = notional * size_mult / price.to_f64();
            let qty = Quantity::from(raw_qty).floor_to_step(self.qty_step);
            if !qty.is_positive() || qty.to_f64() < self.cfg.min_quote_size {
                continue;
            }

            layers.push(QuoteLayer {
                price,
                quantity: qty,
            });
        }

        layers
    }

    /// Requote gating: minimum interval since the last emitted quote and a
    /// minimum reference price move since its source snapshot.
    fn should_skip_requote(&self, ticker: &BookTicker, now: f64) -> bool {
        if self.last_quote_ts > 0.0 {
            let since_ms = (now - self.last_quote_ts) * 1000.0;
            if since_ms < self.cfg.min_requote_ms as f64 {
                tracing::debug!(
                    since_ms,
                    min_requote_ms = self.cfg.min_requote_ms,
                    "requote interval not met"
                );
                return true;
            }
        }

        if let Some(last) = &self.last_source {
            let bid_change = (ticker.bid_px.to_f64() - last.bid_px.to_f64()).abs();
            let ask_change = (ticker.ask_px.to_f64() - last.ask_px.to_f64()).abs();
            if bid_change.max(ask_change) < self.cfg.requote_tick_threshold {
                tracing::debug!(
                    bid_change,
                    ask_change,
                    threshold = self.cfg.requote_tick_threshold,
                    "reference move below requote threshold"
                );
                return true;
            }
        }

        false
    }
}

#[derive(Clone, Copy)]
enum SideOfBook {
    Bid,
    Ask,
}
