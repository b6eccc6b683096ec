//! Database schema.
//!
//! All tables are created idempotently at open. Monetary columns are stored
//! as REAL; the fixed-point types are reconstructed at the repository
//! boundary. Layer arrays are stored as JSON text.

/// Schema applied on every open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quotes (
    quote_id        TEXT PRIMARY KEY,
    ts              REAL NOT NULL,
    symbol_src      TEXT NOT NULL,
    symbol_dst      TEXT NOT NULL,
    source_bid_px   REAL NOT NULL,
    source_bid_qty  REAL NOT NULL,
    source_ask_px   REAL NOT NULL,
    source_ask_qty  REAL NOT NULL,
    source_ts       REAL NOT NULL,
    bid_layers      TEXT NOT NULL,
    ask_layers      TEXT NOT NULL,
    spread_bps      REAL,
    status          TEXT NOT NULL DEFAULT 'generated',
    expires_at      REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quotes_symbol_status
    ON quotes(symbol_dst, status);

CREATE TABLE IF NOT EXISTS orders (
    order_id          TEXT PRIMARY KEY,
    quote_id          TEXT REFERENCES quotes(quote_id),
    symbol            TEXT NOT NULL,
    side              TEXT NOT NULL,
    order_type        TEXT NOT NULL,
    price             REAL,
    quantity          REAL NOT NULL,
    filled_qty        REAL NOT NULL DEFAULT 0,
    avg_fill_px       REAL NOT NULL DEFAULT 0,
    state             TEXT NOT NULL DEFAULT 'idle',
    external_order_id TEXT,
    error_message     TEXT,
    created_at        REAL NOT NULL,
    updated_at        REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_state ON orders(state);
CREATE INDEX IF NOT EXISTS idx_orders_symbol_state ON orders(symbol, state);
CREATE INDEX IF NOT EXISTS idx_orders_external ON orders(external_order_id);

CREATE TABLE IF NOT EXISTS fills (
    fill_id          TEXT PRIMARY KEY,
    order_id         TEXT NOT NULL REFERENCES orders(order_id),
    symbol           TEXT NOT NULL,
    side             TEXT NOT NULL,
    price            REAL NOT NULL,
    quantity         REAL NOT NULL,
    executed_at      REAL NOT NULL,
    trade_id         TEXT,
    commission       REAL NOT NULL DEFAULT 0,
    commission_asset TEXT,
    is_maker         INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_fills_order ON fills(order_id);

CREATE TABLE IF NOT EXISTS positions (
    symbol          TEXT PRIMARY KEY,
    quantity        REAL NOT NULL DEFAULT 0,
    avg_entry_price REAL NOT NULL DEFAULT 0,
    realized_pnl    REAL NOT NULL DEFAULT 0,
    unrealized_pnl  REAL NOT NULL DEFAULT 0,
    last_update     REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS account_balances (
    asset      TEXT PRIMARY KEY,
    available  REAL NOT NULL DEFAULT 0,
    locked     REAL NOT NULL DEFAULT 0,
    total      REAL NOT NULL DEFAULT 0,
    updated_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    event_id      TEXT PRIMARY KEY,
    event_type    TEXT NOT NULL,
    aggregate_id  TEXT NOT NULL,
    payload       TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    retry_count   INTEGER NOT NULL DEFAULT 0,
    next_retry_at REAL,
    last_error    TEXT,
    created_at    REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_status_retry
    ON outbox(status, next_retry_at);
"#;
