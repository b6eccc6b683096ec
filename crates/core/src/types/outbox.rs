//! Transactional-outbox event entity.
//!
//! An [`OutboxEvent`] is the only vehicle by which an order-side effect
//! (submit or cancel) leaves the process. Events are written in the same
//! store transaction as the state change that requires them and dispatched
//! asynchronously by the outbox worker, giving at-least-once delivery
//! without two-phase commit.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of side effect the event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventKind {
    /// Submit a new order to the destination venue.
    SubmitOrder,
    /// Cancel an order on the destination venue.
    CancelOrder,
}

impl OutboxEventKind {
    /// Parse from the snake_case wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submit_order" => Some(OutboxEventKind::SubmitOrder),
            "cancel_order" => Some(OutboxEventKind::CancelOrder),
            _ => None,
        }
    }

    /// snake_case wire form (also the column value in the store).
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutboxEventKind::SubmitOrder => "submit_order",
            OutboxEventKind::CancelOrder => "cancel_order",
        }
    }
}

impl fmt::Display for OutboxEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be claimed (or scheduled for retry).
    Pending,
    /// Claimed by a dispatcher.
    InFlight,
    /// Delivered successfully.
    Completed,
    /// Terminal venue rejection.
    Failed,
    /// Retries exhausted.
    DeadLetter,
}

impl OutboxStatus {
    /// Parse from the snake_case wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "in_flight" => Some(OutboxStatus::InFlight),
            "completed" => Some(OutboxStatus::Completed),
            "failed" => Some(OutboxStatus::Failed),
            "dead_letter" => Some(OutboxStatus::DeadLetter),
            _ => None,
        }
    }

    /// snake_case wire form (also the column value in the store).
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted side-effect event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique event id (UUID v4).
    pub event_id: String,
    /// Kind of side effect.
    pub kind: OutboxEventKind,
    /// The order this event acts on. For unregistered-order sweeps this is
    /// the venue's external id, since no local order exists.
    pub aggregate_id: String,
    /// JSON payload handed to the gateway.
    pub payload: serde_json::Value,
    /// Delivery status.
    pub status: OutboxStatus,
    /// Number of delivery attempts that have failed so far.
    pub retry_count: u32,
    /// Earliest time the next attempt may run, seconds since epoch.
    pub next_retry_at: Option<f64>,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Creation time, seconds since epoch.
    pub created_at: f64,
}

impl OutboxEvent {
    /// Build a fresh pending event with a new UUID.
    pub fn new(
        kind: OutboxEventKind,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
        created_at: f64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            aggregate_id: aggregate_id.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            created_at,
        }
    }
}
