//! Quote repository operations.

use rusqlite::{params, OptionalExtension};

use xmaker_core::types::{BookTicker, Price, Quantity, Quote, QuoteLayer, QuoteStatus, Symbol};

use crate::{Store, StoreError, StoreResult};

impl Store {
    /// Persist a quote.
    pub fn insert_quote(&self, quote: &Quote) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO quotes (
                     quote_id, ts, symbol_src, symbol_dst,
                     source_bid_px, source_bid_qty, source_ask_px, source_ask_qty,
                     source_ts, bid_layers, ask_layers, spread_bps, status, expires_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    quote.quote_id,
                    quote.ts,
                    quote.symbol_src.as_str(),
                    quote.symbol_dst.as_str(),
                    quote.source.bid_px.to_f64(),
                    quote.source.bid_qty.to_f64(),
                    quote.source.ask_px.to_f64(),
                    quote.source.ask_qty.to_f64(),
                    quote.source.ts,
                    serde_json::to_string(&quote.bid_layers).map_err(StoreError::from)?,
                    serde_json::to_string(&quote.ask_layers).map_err(StoreError::from)?,
                    quote.spread_bps,
                    quote.status.as_str(),
                    quote.expires_at
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a quote by id.
    pub fn get_quote(&self, quote_id: &str) -> StoreResult<Option<Quote>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM quotes WHERE quote_id = ?1",
                params![quote_id],
                quote_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Quotes for a destination symbol whose status still maps to live
    /// orders, newest first.
    pub fn active_quotes(&self, symbol_dst: &Symbol) -> StoreResult<Vec<Quote>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM quotes
                 WHERE symbol_dst = ?1
                   AND status IN ('persisted', 'orders_created', 'orders_submitted')
                 ORDER BY ts DESC",
            )?;
            let rows = stmt.query_map(params![symbol_dst.as_str()], quote_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Advance a quote's lifecycle status.
    pub fn update_quote_status(&self, quote_id: &str, status: QuoteStatus) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE quotes SET status = ?1 WHERE quote_id = ?2",
                params![status.as_str(), quote_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("quote {quote_id}")));
            }
            Ok(())
        })
    }

    /// Expire active quotes whose `expires_at` has passed. Returns the
    /// number of quotes expired.
    pub fn expire_quotes(&self, now: f64) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE quotes SET status = 'expired'
                 WHERE expires_at <= ?1
                   AND status IN ('persisted', 'orders_created', 'orders_submitted')",
                params![now],
            )?;
            Ok(changed as u32)
        })
    }
}

fn quote_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Quote> {
    let status: String = row.get("status")?;
    let bid_layers: String = row.get("bid_layers")?;
    let ask_layers: String = row.get("ask_layers")?;
    let symbol_src = Symbol::new(row.get::<_, String>("symbol_src")?);
    Ok(Quote {
        quote_id: row.get("quote_id")?,
        ts: row.get("ts")?,
        symbol_src: symbol_src.clone(),
        symbol_dst: Symbol::new(row.get::<_, String>("symbol_dst")?),
        source: BookTicker {
            symbol: symbol_src,
            bid_px: Price::from(row.get::<_, f64>("source_bid_px")?),
            bid_qty: Quantity::from(row.get::<_, f64>("source_bid_qty")?),
            ask_px: Price::from(row.get::<_, f64>("source_ask_px")?),
            ask_qty: Quantity::from(row.get::<_, f64>("source_ask_qty")?),
            ts: row.get("source_ts")?,
        },
        bid_layers: serde_json::from_str::<Vec<QuoteLayer>>(&bid_layers).unwrap_or_default(),
        ask_layers: serde_json::from_str::<Vec<QuoteLayer>>(&ask_layers).unwrap_or_default(),
        spread_bps: row.get("spread_bps")?,
        status: QuoteStatus::parse(&status).unwrap_or(QuoteStatus::Generated),
        expires_at: row.get("expires_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_quote(id: &str, ts: f64, status: QuoteStatus) -> Quote {
        Quote {
            quote_id: id.into(),
            ts,
            symbol_src: Symbol::new("ADAUSDT"),
            symbol_dst: Symbol::new("ADAUSDM"),
            source: BookTicker {
                symbol: Symbol::new("ADAUSDT"),
                bid_px: Price::from(0.4999),
                bid_qty: Quantity::from(500.0),
                ask_px: Price::from(0.5001),
                ask_qty: Quantity::from(500.0),
                ts,
            },
            bid_layers: vec![QuoteLayer {
                price: Price::new(4998, 4),
                quantity: Quantity::from(1000.0),
            }],
            ask_layers: vec![QuoteLayer {
                price: Price::new(5003, 4),
                quantity: Quantity::from(999.0),
            }],
            spread_bps: Some(10.0),
            status,
            expires_at: ts + 2.0,
        }
    }

    #[test]
    fn test_quote_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.insert_quote(&make_quote("q-1", 100.0, QuoteStatus::Persisted)).unwrap();

        let loaded = store.get_quote("q-1").unwrap().unwrap();
        assert_eq!(loaded.symbol_dst, Symbol::new("ADAUSDM"));
        assert_eq!(loaded.bid_layers.len(), 1);
        assert_eq!(loaded.bid_layers[0].price, Price::new(4998, 4));
        assert_eq!(loaded.status, QuoteStatus::Persisted);
        assert_eq!(loaded.spread_bps, Some(10.0));
    }

    #[test]
    fn test_active_quotes_filters_status() {
        let store = Store::open_in_memory().unwrap();
        store.insert_quote(&make_quote("q-1", 100.0, QuoteStatus::Persisted)).unwrap();
        store.insert_quote(&make_quote("q-2", 101.0, QuoteStatus::OrdersSubmitted)).unwrap();
        store.insert_quote(&make_quote("q-3", 102.0, QuoteStatus::Expired)).unwrap();

        let active = store.active_quotes(&Symbol::new("ADAUSDM")).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].quote_id, "q-2"); // newest first
    }

    #[test]
    fn test_status_update() {
        let store = Store::open_in_memory().unwrap();
        store.insert_quote(&make_quote("q-1", 100.0, QuoteStatus::Persisted)).unwrap();
        store.update_quote_status("q-1", QuoteStatus::OrdersSubmitted).unwrap();
        assert_eq!(
            store.get_quote("q-1").unwrap().unwrap().status,
            QuoteStatus::OrdersSubmitted
        );
        assert!(store.update_quote_status("ghost", QuoteStatus::Expired).is_err());
    }

    #[test]
    fn test_expire_quotes() {
        let store = Store::open_in_memory().unwrap();
        store.insert_quote(&make_quote("q-old", 100.0, QuoteStatus::Persisted)).unwrap();
        store.insert_quote(&make_quote("q-new", 200.0, QuoteStatus::Persisted)).unwrap();

        // q-old expires at 102, q-new at 202.
        assert_eq!(store.expire_quotes(150.0).unwrap(), 1);
        assert_eq!(store.get_quote("q-old").unwrap().unwrap().status, QuoteStatus::Expired);
        assert_eq!(store.get_quote("q-new").unwrap().unwrap().status, QuoteStatus::Persisted);
        // Idempotent.
        assert_eq!(store.expire_quotes(150.0).unwrap(), 0);
    }
}
