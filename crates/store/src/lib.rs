//! # xmaker-store
//!
//! SQLite-backed persistent store with ACID transactions for quotes,
//! orders, fills, positions, balances, and the transactional outbox.
//!
//! Writers serialize through a single `Mutex<Connection>`; the database is
//! opened in WAL mode so readers never block the writer. The one operation
//! the whole design leans on is [`Store::insert_order_with_event`]: an order
//! row and its `submit_order` outbox row commit in the same transaction, so
//! an order can never exist without its delivery intent (or vice versa).

mod outbox;
mod quotes;
mod schema;

pub use outbox::ClaimedEvent;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use xmaker_core::types::{
    Balance, Fill, Order, OrderId, OrderState, OrderType, OutboxEvent, Position, Price,
    Quantity, Side, Symbol, VenueOrderId,
};

/// Store operation failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Row payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Optimistic state update found a different prior state.
    #[error("stale state for order {order_id}: expected {expected}")]
    StaleState {
        order_id: String,
        expected: OrderState,
    },
    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Stored column value does not parse into its domain enum.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// SQLite store. One writer connection guarded by a mutex; WAL mode keeps
/// concurrent readers cheap.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a passive WAL checkpoint.
    pub fn wal_checkpoint(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Borrow the connection for one locked operation.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction, rolling back on error.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Orders ──────────────────────────────────────────────────────

    /// Insert an order together with its outbox event in one transaction.
    pub fn insert_order_with_event(
        &self,
        order: &Order,
        event: &OutboxEvent,
    ) -> StoreResult<()> {
        self.with_tx(|tx| {
            insert_order_row(tx, order)?;
            outbox::insert_event_row(tx, event)?;
            Ok(())
        })
    }

    /// Insert an order row without a side-effect event.
    pub fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.with_conn(|conn| insert_order_row(conn, order))
    }

    /// Transition an order's state with an optimistic check on the prior
    /// state. Optionally records the venue order id and an error message.
    ///
    /// Returns [`StoreError::StaleState`] if the row was not in `from`.
    pub fn update_order_state(
        &self,
        order_id: &OrderId,
        from: OrderState,
        to: OrderState,
        external_order_id: Option<&VenueOrderId>,
        error_message: Option<&str>,
        now: f64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders
                 SET state = ?1,
                     external_order_id = COALESCE(?2, external_order_id),
                     error_message = COALESCE(?3, error_message),
                     updated_at = ?4
                 WHERE order_id = ?5 AND state = ?6",
                params![
                    to.as_str(),
                    external_order_id.map(|e| e.0.as_str()),
                    error_message,
                    now,
                    order_id.as_str(),
                    from.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::StaleState {
                    order_id: order_id.as_str().to_string(),
                    expected: from,
                });
            }
            Ok(())
        })
    }

    /// Transition an order state together with an outbox event (used for
    /// cancel requests: the cancel intent commits with nothing else, but
    /// the optimistic check still guards against racing terminal updates).
    pub fn append_event_checked(
        &self,
        order_id: &OrderId,
        expected_states: &[OrderState],
        event: &OutboxEvent,
    ) -> StoreResult<()> {
        self.with_tx(|tx| {
            let state: Option<String> = tx
                .query_row(
                    "SELECT state FROM orders WHERE order_id = ?1",
                    params![order_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let state = state
                .ok_or_else(|| StoreError::NotFound(format!("order {}", order_id)))?;
            let state = OrderState::parse(&state)
                .ok_or_else(|| StoreError::Corrupt(format!("order state '{state}'")))?;
            if !expected_states.contains(&state) {
                return Err(StoreError::StaleState {
                    order_id: order_id.as_str().to_string(),
                    expected: state,
                });
            }
            outbox::insert_event_row(tx, event)?;
            Ok(())
        })
    }

    /// Update an order's cumulative fill columns.
    pub fn update_order_fill(
        &self,
        order_id: &OrderId,
        filled_qty: Quantity,
        avg_fill_px: Price,
        now: f64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders
                 SET filled_qty = ?1, avg_fill_px = ?2, updated_at = ?3
                 WHERE order_id = ?4",
                params![
                    filled_qty.to_f64(),
                    avg_fill_px.to_f64(),
                    now,
                    order_id.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("order {}", order_id)));
            }
            Ok(())
        })
    }

    /// Fetch an order by client id.
    pub fn get_order(&self, order_id: &OrderId) -> StoreResult<Option<Order>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM orders WHERE order_id = ?1",
                params![order_id.as_str()],
                order_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Fetch an order by the venue-assigned id.
    pub fn get_order_by_external(&self, external_id: &str) -> StoreResult<Option<Order>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM orders WHERE external_order_id = ?1",
                params![external_id],
                order_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// List orders in a given state, oldest first.
    pub fn orders_by_state(&self, state: OrderState) -> StoreResult<Vec<Order>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM orders WHERE state = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![state.as_str()], order_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// List orders for `(symbol, state)`, oldest first.
    pub fn orders_by_symbol_state(
        &self,
        symbol: &Symbol,
        state: OrderState,
    ) -> StoreResult<Vec<Order>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM orders
                 WHERE symbol = ?1 AND state = ?2
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![symbol.as_str(), state.as_str()], order_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Venue ids of every order the store knows about (for the
    /// unregistered-order sweep).
    pub fn known_external_ids(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT external_order_id FROM orders WHERE external_order_id IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Count of non-terminal orders.
    pub fn open_order_count(&self) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM orders WHERE state IN ('idle', 'pending', 'working')",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // ── Fills ───────────────────────────────────────────────────────

    /// Insert a fill. Duplicate `fill_id`s are ignored; returns `true` if
    /// the row was new.
    pub fn insert_fill(&self, fill: &Fill) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO fills (
                     fill_id, order_id, symbol, side, price, quantity,
                     executed_at, trade_id, commission, commission_asset, is_maker
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    fill.fill_id,
                    fill.order_id.as_str(),
                    fill.symbol.as_str(),
                    fill.side.as_str(),
                    fill.price.to_f64(),
                    fill.quantity.to_f64(),
                    fill.executed_at,
                    fill.trade_id,
                    fill.commission.to_f64(),
                    fill.commission_asset,
                    fill.is_maker as i64
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// All fills for an order in execution order.
    pub fn fills_for_order(&self, order_id: &OrderId) -> StoreResult<Vec<Fill>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM fills WHERE order_id = ?1 ORDER BY executed_at",
            )?;
            let rows = stmt.query_map(params![order_id.as_str()], fill_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    // ── Positions and balances ──────────────────────────────────────

    /// Insert or replace the position row for a symbol.
    pub fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO positions (
                     symbol, quantity, avg_entry_price, realized_pnl,
                     unrealized_pnl, last_update
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(symbol) DO UPDATE SET
                     quantity = excluded.quantity,
                     avg_entry_price = excluded.avg_entry_price,
                     realized_pnl = excluded.realized_pnl,
                     unrealized_pnl = excluded.unrealized_pnl,
                     last_update = excluded.last_update",
                params![
                    position.symbol.as_str(),
                    position.quantity.to_f64(),
                    position.avg_entry_price.to_f64(),
                    position.realized_pnl.to_f64(),
                    position.unrealized_pnl.to_f64(),
                    position.last_update
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch the position row for a symbol.
    pub fn get_position(&self, symbol: &Symbol) -> StoreResult<Option<Position>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM positions WHERE symbol = ?1",
                params![symbol.as_str()],
                position_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// All non-flat positions.
    pub fn all_positions(&self) -> StoreResult<Vec<Position>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM positions WHERE quantity != 0")?;
            let rows = stmt.query_map([], position_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Insert or replace the balance row for an asset.
    pub fn upsert_balance(&self, balance: &Balance) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO account_balances (asset, available, locked, total, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(asset) DO UPDATE SET
                     available = excluded.available,
                     locked = excluded.locked,
                     total = excluded.total,
                     updated_at = excluded.updated_at",
                params![
                    balance.asset,
                    balance.available.to_f64(),
                    balance.locked.to_f64(),
                    balance.total.to_f64(),
                    balance.updated_at
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch the balance row for an asset.
    pub fn get_balance(&self, asset: &str) -> StoreResult<Option<Balance>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM account_balances WHERE asset = ?1",
                params![asset],
                balance_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// All balances with a non-zero total.
    pub fn all_balances(&self) -> StoreResult<Vec<Balance>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM account_balances WHERE total > 0")?;
            let rows = stmt.query_map([], balance_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

pub(crate) fn insert_order_row(
    conn: &Connection,
    order: &Order,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO orders (
             order_id, quote_id, symbol, side, order_type, price, quantity,
             filled_qty, avg_fill_px, state, external_order_id, error_message,
             created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            order.order_id.as_str(),
            order.quote_id,
            order.symbol.as_str(),
            order.side.as_str(),
            order.order_type.as_str(),
            order.price.map(|p| p.to_f64()),
            order.quantity.to_f64(),
            order.filled_qty.to_f64(),
            order.avg_fill_px.to_f64(),
            order.state.as_str(),
            order.external_order_id.as_ref().map(|e| e.0.as_str()),
            order.error_message,
            order.created_at,
            order.updated_at
        ],
    )?;
    Ok(())
}

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let side: String = row.get("side")?;
    let order_type: String = row.get("order_type")?;
    let state: String = row.get("state")?;
    Ok(Order {
        order_id: OrderId::new(row.get::<_, String>("order_id")?),
        quote_id: row.get("quote_id")?,
        symbol: Symbol::new(row.get::<_, String>("symbol")?),
        side: Side::parse(&side).unwrap_or(Side::Buy),
        order_type: OrderType::parse(&order_type).unwrap_or(OrderType::Limit),
        price: row
            .get::<_, Option<f64>>("price")?
            .map(Price::from),
        quantity: Quantity::from(row.get::<_, f64>("quantity")?),
        filled_qty: Quantity::from(row.get::<_, f64>("filled_qty")?),
        avg_fill_px: Price::from(row.get::<_, f64>("avg_fill_px")?),
        state: OrderState::parse(&state).unwrap_or(OrderState::Idle),
        external_order_id: row
            .get::<_, Option<String>>("external_order_id")?
            .map(VenueOrderId),
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn fill_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fill> {
    let side: String = row.get("side")?;
    Ok(Fill {
        fill_id: row.get("fill_id")?,
        order_id: OrderId::new(row.get::<_, String>("order_id")?),
        symbol: Symbol::new(row.get::<_, String>("symbol")?),
        side: Side::parse(&side).unwrap_or(Side::Buy),
        price: Price::from(row.get::<_, f64>("price")?),
        quantity: Quantity::from(row.get::<_, f64>("quantity")?),
        executed_at: row.get("executed_at")?,
        trade_id: row.get("trade_id")?,
        commission: Price::from(row.get::<_, f64>("commission")?),
        commission_asset: row.get("commission_asset")?,
        is_maker: row.get::<_, i64>("is_maker")? != 0,
    })
}

fn position_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        symbol: Symbol::new(row.get::<_, String>("symbol")?),
        quantity: Quantity::from(row.get::<_, f64>("quantity")?),
        avg_entry_price: Price::from(row.get::<_, f64>("avg_entry_price")?),
        realized_pnl: Price::from(row.get::<_, f64>("realized_pnl")?),
        unrealized_pnl: Price::from(row.get::<_, f64>("unrealized_pnl")?),
        last_update: row.get("last_update")?,
    })
}

fn balance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Balance> {
    Ok(Balance {
        asset: row.get("asset")?,
        available: Quantity::from(row.get::<_, f64>("available")?),
        locked: Quantity::from(row.get::<_, f64>("locked")?),
        total: Quantity::from(row.get::<_, f64>("total")?),
        updated_at: row.get("updated_at")?,
    })
}
