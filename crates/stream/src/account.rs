//! Destination account stream client.
//!
//! Authenticated stream of balance, order, and fill events. Frames are
//! untyped at the wire; each is validated and decoded into an
//! [`AccountEvent`] before it reaches the reconciler. Unknown
//! discriminators are logged and dropped.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;

use crate::ws::{ConnectionState, SessionConfig, WsHandler, WsSession, WsSink};

/// Typed account-stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    /// Balance snapshot for one asset.
    Balance {
        /// Asset ticker.
        asset: String,
        /// Freely usable amount.
        available: f64,
        /// Amount locked in open orders.
        locked: f64,
    },
    /// Order lifecycle update.
    OrderUpdate {
        /// Venue order id.
        external_order_id: String,
        /// Venue status string ("open", "cancelled", "rejected", ...).
        status: String,
        /// Optional human-readable reason.
        reason: Option<String>,
    },
    /// Execution against one of our orders.
    Fill {
        /// Venue execution id.
        fill_id: String,
        /// Venue order id.
        external_order_id: String,
        /// Trading pair.
        symbol: String,
        /// "buy" or "sell".
        side: String,
        /// Execution price.
        price: f64,
        /// Executed quantity.
        quantity: f64,
        /// Venue execution time, seconds since epoch.
        executed_at: f64,
        /// Fee charged.
        commission: f64,
        /// Asset the fee was charged in.
        commission_asset: Option<String>,
        /// Whether our order was the maker.
        is_maker: bool,
    },
}

/// Decode one account frame. Returns `None` for unknown or malformed
/// frames (they are logged by the caller and dropped).
pub fn parse_account_frame(text: &str, now: f64) -> Option<AccountEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type")?.as_str()?;

    match kind {
        "balance" => Some(AccountEvent::Balance {
            asset: value.get("asset")?.as_str()?.to_string(),
            available: as_f64(value.get("available")?)?,
            locked: as_f64(value.get("locked")?)?,
        }),
        "order" => Some(AccountEvent::OrderUpdate {
            external_order_id: value.get("order_id")?.as_str()?.to_string(),
            status: value.get("status")?.as_str()?.to_lowercase(),
            reason: value
                .get("reason")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }),
        "fill" => Some(AccountEvent::Fill {
            fill_id: value.get("execution_id")?.as_str()?.to_string(),
            external_order_id: value.get("order_id")?.as_str()?.to_string(),
            symbol: value.get("symbol")?.as_str()?.to_uppercase(),
            side: value.get("side")?.as_str()?.to_lowercase(),
            price: as_f64(value.get("executed_price")?)?,
            quantity: as_f64(value.get("executed_qty")?)?,
            executed_at: value
                .get("created_time")
                .and_then(as_f64)
                .unwrap_or(now),
            commission: value.get("fee_charged").and_then(as_f64).unwrap_or(0.0),
            commission_asset: value
                .get("fee_unit")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            is_maker: value
                .get("is_maker")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }),
        other => {
            tracing::warn!(kind = other, "unknown account frame type dropped");
            None
        }
    }
}

/// Venue numbers arrive as either JSON numbers or decimal strings.
fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Reconnecting client for the destination account stream.
pub struct AccountStreamClient {
    url: String,
    api_key: String,
    session_config: SessionConfig,
    clock: SharedClock,
    tx: mpsc::Sender<AccountEvent>,
}

impl AccountStreamClient {
    /// Create a client forwarding events into `tx`.
    pub fn new(
        url: String,
        api_key: String,
        session_config: SessionConfig,
        clock: SharedClock,
        tx: mpsc::Sender<AccountEvent>,
    ) -> Self {
        Self {
            url,
            api_key,
            session_config,
            clock,
            tx,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let session = WsSession::new(self.url.clone(), self.session_config.clone());
        let mut handler = AccountHandler {
            api_key: self.api_key,
            clock: self.clock,
            tx: self.tx,
        };
        session.run(&mut handler, cancel).await
    }
}

struct AccountHandler {
    api_key: String,
    clock: SharedClock,
    tx: mpsc::Sender<AccountEvent>,
}

#[async_trait::async_trait]
impl WsHandler for AccountHandler {
    async fn on_connect(&mut self, sink: &mut WsSink) -> anyhow::Result<()> {
        // Authenticate, then subscribe to the account channel. The venue
        // replays current balances and open orders after subscription, so
        // a reconnect self-heals the reconciler's view.
        let auth = serde_json::json!({
            "method": "AUTH",
            "api_key": self.api_key,
        });
        sink.send(Message::Text(auth.to_string())).await?;

        let subscribe = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": ["account"],
            "id": 1
        });
        sink.send(Message::Text(subscribe.to_string())).await?;
        tracing::info!("account stream authenticated and subscribed");
        Ok(())
    }

    async fn on_message(&mut self, msg: Message) -> anyhow::Result<()> {
        let Message::Text(text) = msg else {
            return Ok(());
        };
        if let Some(event) = parse_account_frame(&text, self.clock.now()) {
            // Backpressure: the reconciler must observe every event, so a
            // full channel blocks the read loop rather than dropping.
            if self.tx.send(event).await.is_err() {
                anyhow::bail!("account event channel closed");
            }
        } else {
            tracing::debug!(frame = %text, "undecodable account frame dropped");
        }
        Ok(())
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        match &state {
            ConnectionState::Connected => tracing::info!("account stream connected"),
            ConnectionState::Disconnected { reason } => {
                tracing::warn!(reason, "account stream disconnected");
            }
            ConnectionState::Reconnecting { attempt } => {
                tracing::info!(attempt, "account stream reconnecting");
            }
            ConnectionState::Failed { reason } => {
                tracing::error!(reason, "account stream failed");
            }
        }
    }
}
