//! Outbox repository operations.
//!
//! The claim operation is the concurrency boundary: claimed rows flip from
//! `pending` to `in_flight` inside the claiming transaction, so two
//! dispatcher tasks can never pick up the same event. Rows left `in_flight`
//! by a crash are requeued at startup via [`Store::requeue_in_flight`].

use rusqlite::{params, Connection, OptionalExtension};

use xmaker_core::types::{OutboxEvent, OutboxEventKind, OutboxStatus};

use crate::{Store, StoreError, StoreResult};

/// A claimed outbox event, handed to a dispatcher.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    /// The event row as it was at claim time.
    pub event: OutboxEvent,
}

impl Store {
    /// Append a standalone outbox event (no accompanying state change).
    ///
    /// Used by the reconciler and the cleanup sweep for cancels of orders
    /// the store does not own.
    pub fn enqueue_event(&self, event: &OutboxEvent) -> StoreResult<()> {
        self.with_conn(|conn| insert_event_row(conn, event))
    }

    /// Claim up to `limit` dispatchable events, oldest first.
    ///
    /// Dispatchable means `pending` with no retry schedule (or one that has
    /// come due), with nothing ahead of it for the same aggregate: an
    /// aggregate with an in-flight event, or an older pending event still
    /// waiting on its retry schedule, yields nothing. This is what keeps
    /// per-aggregate dispatch strictly FIFO with one event in flight.
    /// Claimed rows become `in_flight`.
    pub fn claim_pending(&self, limit: u32, now: f64) -> StoreResult<Vec<ClaimedEvent>> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT * FROM outbox o
                 WHERE o.status = 'pending'
                   AND (o.next_retry_at IS NULL OR o.next_retry_at <= ?1)
                   AND NOT EXISTS (
                       SELECT 1 FROM outbox b
                       WHERE b.aggregate_id = o.aggregate_id
                         AND b.status = 'in_flight'
                   )
                   AND NOT EXISTS (
                       SELECT 1 FROM outbox e
                       WHERE e.aggregate_id = o.aggregate_id
                         AND e.status = 'pending'
                         AND (e.created_at < o.created_at
                              OR (e.created_at = o.created_at
                                  AND e.event_id < o.event_id))
                   )
                 ORDER BY o.created_at
                 LIMIT ?2",
            )?;
            let events = stmt
                .query_map(params![now, limit], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut claimed = Vec::with_capacity(events.len());
            for mut event in events {
                tx.execute(
                    "UPDATE outbox SET status = 'in_flight' WHERE event_id = ?1",
                    params![event.event_id],
                )?;
                event.status = OutboxStatus::InFlight;
                claimed.push(ClaimedEvent { event });
            }
            Ok(claimed)
        })
    }

    /// Mark an event delivered.
    pub fn complete_event(&self, event_id: &str) -> StoreResult<()> {
        self.set_event_status(event_id, OutboxStatus::Completed, None, None)
    }

    /// Schedule an event for retry after a transient failure.
    pub fn retry_event(
        &self,
        event_id: &str,
        error: &str,
        next_retry_at: f64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE outbox
                 SET status = 'pending',
                     retry_count = retry_count + 1,
                     next_retry_at = ?1,
                     last_error = ?2
                 WHERE event_id = ?3",
                params![next_retry_at, error, event_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("outbox event {event_id}")));
            }
            Ok(())
        })
    }

    /// Mark an event terminally failed (venue rejected it).
    pub fn fail_event(&self, event_id: &str, error: &str) -> StoreResult<()> {
        self.set_event_status(event_id, OutboxStatus::Failed, Some(error), None)
    }

    /// Move an event to the dead-letter state after exhausting retries.
    pub fn dead_letter_event(&self, event_id: &str, error: &str) -> StoreResult<()> {
        self.set_event_status(event_id, OutboxStatus::DeadLetter, Some(error), None)
    }

    /// Return `in_flight` rows to `pending`. Called once at startup to
    /// recover events orphaned by a crash mid-dispatch.
    pub fn requeue_in_flight(&self) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE outbox SET status = 'pending' WHERE status = 'in_flight'",
                [],
            )?;
            Ok(changed as u32)
        })
    }

    /// Delete completed events created before `before`.
    pub fn purge_completed(&self, before: f64) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM outbox WHERE status = 'completed' AND created_at < ?1",
                params![before],
            )?;
            Ok(changed as u32)
        })
    }

    /// Count events in a given status.
    pub fn outbox_count(&self, status: OutboxStatus) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM outbox WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Fetch a single event by id.
    pub fn get_event(&self, event_id: &str) -> StoreResult<Option<OutboxEvent>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM outbox WHERE event_id = ?1",
                params![event_id],
                event_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Live (pending or in-flight) events for one aggregate and kind.
    ///
    /// Backs the "at most one live event per (order, action)" invariant.
    pub fn live_events_for_aggregate(
        &self,
        aggregate_id: &str,
        kind: OutboxEventKind,
    ) -> StoreResult<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM outbox
                 WHERE aggregate_id = ?1 AND event_type = ?2
                   AND status IN ('pending', 'in_flight')",
                params![aggregate_id, kind.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    fn set_event_status(
        &self,
        event_id: &str,
        status: OutboxStatus,
        error: Option<&str>,
        next_retry_at: Option<f64>,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE outbox
                 SET status = ?1,
                     last_error = COALESCE(?2, last_error),
                     next_retry_at = ?3
                 WHERE event_id = ?4",
                params![status.as_str(), error, next_retry_at, event_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("outbox event {event_id}")));
            }
            Ok(())
        })
    }
}

pub(crate) fn insert_event_row(conn: &Connection, event: &OutboxEvent) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO outbox (
             event_id, event_type, aggregate_id, payload, status,
             retry_count, next_retry_at, last_error, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_id,
            event.kind.as_str(),
            event.aggregate_id,
            serde_json::to_string(&event.payload)
                .map_err(StoreError::from)?,
            event.status.as_str(),
            event.retry_count,
            event.next_retry_at,
            event.last_error,
            event.created_at
        ],
    )?;
    Ok(())
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let kind: String = row.get("event_type")?;
    let status: String = row.get("status")?;
    let payload: String = row.get("payload")?;
    Ok(OutboxEvent {
        event_id: row.get("event_id")?,
        kind: OutboxEventKind::parse(&kind).unwrap_or(OutboxEventKind::SubmitOrder),
        aggregate_id: row.get("aggregate_id")?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        status: OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Pending),
        retry_count: row.get("retry_count")?,
        next_retry_at: row.get("next_retry_at")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(aggregate: &str, created_at: f64) -> OutboxEvent {
        OutboxEvent::new(
            OutboxEventKind::SubmitOrder,
            aggregate,
            serde_json::json!({"symbol": "ADAUSDM"}),
            created_at,
        )
    }

    #[test]
    fn test_claim_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-b", 20.0)).unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();

        let claimed = store.claim_pending(10, 100.0).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].event.aggregate_id, "ord-a");
        assert_eq!(claimed[1].event.aggregate_id, "ord-b");
        assert!(claimed.iter().all(|c| c.event.status == OutboxStatus::InFlight));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();

        assert_eq!(store.claim_pending(10, 100.0).unwrap().len(), 1);
        // Already in flight; a second claim finds nothing.
        assert!(store.claim_pending(10, 100.0).unwrap().is_empty());
    }

    #[test]
    fn test_claim_respects_limit() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store.enqueue_event(&make_event(&format!("ord-{i}"), i as f64)).unwrap();
        }
        assert_eq!(store.claim_pending(3, 100.0).unwrap().len(), 3);
        assert_eq!(store.claim_pending(3, 100.0).unwrap().len(), 2);
    }

    #[test]
    fn test_same_aggregate_fifo() {
        let store = Store::open_in_memory().unwrap();
        let mut submit = make_event("ord-a", 10.0);
        submit.kind = OutboxEventKind::SubmitOrder;
        let mut cancel = make_event("ord-a", 20.0);
        cancel.kind = OutboxEventKind::CancelOrder;
        store.enqueue_event(&submit).unwrap();
        store.enqueue_event(&cancel).unwrap();

        // Only the earlier event for the aggregate is claimable.
        let first = store.claim_pending(10, 100.0).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event.kind, OutboxEventKind::SubmitOrder);

        // While it is in flight, the cancel stays queued.
        assert!(store.claim_pending(10, 100.0).unwrap().is_empty());

        store.complete_event(&first[0].event.event_id).unwrap();
        let second = store.claim_pending(10, 100.0).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event.kind, OutboxEventKind::CancelOrder);
    }

    #[test]
    fn test_scheduled_retry_blocks_later_event_same_aggregate() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();
        store.enqueue_event(&make_event("ord-a", 20.0)).unwrap();

        let first = store.claim_pending(10, 100.0).unwrap();
        assert_eq!(first.len(), 1);
        store
            .retry_event(&first[0].event.event_id, "timeout", 500.0)
            .unwrap();

        // The older event waits on its retry schedule; the newer one must
        // not jump the queue.
        assert!(store.claim_pending(10, 200.0).unwrap().is_empty());

        // Once due, the older event goes first.
        let again = store.claim_pending(10, 500.0).unwrap();
        assert_eq!(again.len(), 1);
        assert!((again[0].event.created_at - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_aggregates_claimed_together() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();
        store.enqueue_event(&make_event("ord-b", 11.0)).unwrap();
        assert_eq!(store.claim_pending(10, 100.0).unwrap().len(), 2);
    }

    #[test]
    fn test_retry_schedule_respected() {
        let store = Store::open_in_memory().unwrap();
        let event = make_event("ord-a", 10.0);
        store.enqueue_event(&event).unwrap();

        let claimed = store.claim_pending(10, 100.0).unwrap();
        store
            .retry_event(&claimed[0].event.event_id, "connect timeout", 150.0)
            .unwrap();

        // Before the retry time: not dispatchable.
        assert!(store.claim_pending(10, 149.0).unwrap().is_empty());
        // At the retry time: dispatchable again, with the retry recorded.
        let again = store.claim_pending(10, 150.0).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].event.retry_count, 1);
        assert_eq!(again[0].event.last_error.as_deref(), Some("connect timeout"));
    }

    #[test]
    fn test_complete_and_purge() {
        let store = Store::open_in_memory().unwrap();
        let event = make_event("ord-a", 10.0);
        store.enqueue_event(&event).unwrap();
        let claimed = store.claim_pending(10, 100.0).unwrap();
        store.complete_event(&claimed[0].event.event_id).unwrap();

        assert_eq!(store.outbox_count(OutboxStatus::Completed).unwrap(), 1);
        assert_eq!(store.purge_completed(50.0).unwrap(), 1);
        assert_eq!(store.outbox_count(OutboxStatus::Completed).unwrap(), 0);
    }

    #[test]
    fn test_dead_letter() {
        let store = Store::open_in_memory().unwrap();
        let event = make_event("ord-a", 10.0);
        store.enqueue_event(&event).unwrap();
        let claimed = store.claim_pending(10, 100.0).unwrap();
        store
            .dead_letter_event(&claimed[0].event.event_id, "gave up")
            .unwrap();

        let loaded = store.get_event(&claimed[0].event.event_id).unwrap().unwrap();
        assert_eq!(loaded.status, OutboxStatus::DeadLetter);
        assert_eq!(loaded.last_error.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_requeue_in_flight() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();
        store.claim_pending(10, 100.0).unwrap();

        assert_eq!(store.requeue_in_flight().unwrap(), 1);
        assert_eq!(store.claim_pending(10, 100.0).unwrap().len(), 1);
    }

    #[test]
    fn test_live_events_for_aggregate() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue_event(&make_event("ord-a", 10.0)).unwrap();

        assert_eq!(
            store
                .live_events_for_aggregate("ord-a", OutboxEventKind::SubmitOrder)
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .live_events_for_aggregate("ord-a", OutboxEventKind::CancelOrder)
                .unwrap(),
            0
        );

        let claimed = store.claim_pending(10, 100.0).unwrap();
        // In flight still counts as live.
        assert_eq!(
            store
                .live_events_for_aggregate("ord-a", OutboxEventKind::SubmitOrder)
                .unwrap(),
            1
        );
        store.complete_event(&claimed[0].event.event_id).unwrap();
        assert_eq!(
            store
                .live_events_for_aggregate("ord-a", OutboxEventKind::SubmitOrder)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_unknown_event_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.complete_event("ghost").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
