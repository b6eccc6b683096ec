//! Source venue book-ticker client.
//!
//! Subscribes to the source venue's top-of-book channel and publishes each
//! update into a `watch` channel. The watch semantics are deliberate: the
//! quote task only ever cares about the latest reference prices, so a slow
//! consumer drops intermediate ticks instead of queueing them.

use futures_util::SinkExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use xmaker_core::clock::SharedClock;
use xmaker_core::types::{BookTicker, Price, Quantity, Symbol};

use crate::ws::{ConnectionState, SessionConfig, WsHandler, WsSession, WsSink};

/// Wire format of a source book-ticker frame.
///
/// ```json
/// {"u": 400900217, "s": "ADAUSDT", "b": "0.49990000",
///  "B": "31.21000000", "a": "0.50010000", "A": "40.66000000"}
/// ```
#[derive(Debug, serde::Deserialize)]
struct BookTickerFrame {
    /// Symbol.
    s: String,
    /// Best bid price.
    b: String,
    /// Best bid quantity.
    #[serde(rename = "B")]
    bid_qty: String,
    /// Best ask price.
    a: String,
    /// Best ask quantity.
    #[serde(rename = "A")]
    ask_qty: String,
}

/// Parse a raw frame into a [`BookTicker`], stamping the local receive
/// time. Returns `None` for frames that are not book tickers (subscription
/// confirmations and the like).
pub fn parse_book_ticker(text: &str, now: f64) -> Option<BookTicker> {
    let frame: BookTickerFrame = serde_json::from_str(text).ok()?;
    let bid_px = frame.b.parse::<f64>().ok()?;
    let bid_qty = frame.bid_qty.parse::<f64>().ok()?;
    let ask_px = frame.a.parse::<f64>().ok()?;
    let ask_qty = frame.ask_qty.parse::<f64>().ok()?;

    Some(BookTicker {
        symbol: Symbol::new(frame.s.to_uppercase()),
        bid_px: Price::from(bid_px),
        bid_qty: Quantity::from(bid_qty),
        ask_px: Price::from(ask_px),
        ask_qty: Quantity::from(ask_qty),
        ts: now,
    })
}

/// Reconnecting client for the source book-ticker stream.
pub struct SourceTickerClient {
    url: String,
    symbol: String,
    session_config: SessionConfig,
    clock: SharedClock,
    tx: watch::Sender<Option<BookTicker>>,
}

impl SourceTickerClient {
    /// Create a client publishing into `tx`.
    pub fn new(
        url: String,
        symbol: String,
        session_config: SessionConfig,
        clock: SharedClock,
        tx: watch::Sender<Option<BookTicker>>,
    ) -> Self {
        Self {
            url,
            symbol,
            session_config,
            clock,
            tx,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let session = WsSession::new(self.url.clone(), self.session_config.clone());
        let mut handler = SourceHandler {
            symbol: self.symbol,
            clock: self.clock,
            tx: self.tx,
        };
        session.run(&mut handler, cancel).await
    }
}

struct SourceHandler {
    symbol: String,
    clock: SharedClock,
    tx: watch::Sender<Option<BookTicker>>,
}

#[async_trait::async_trait]
impl WsHandler for SourceHandler {
    async fn on_connect(&mut self, sink: &mut WsSink) -> anyhow::Result<()> {
        let subscribe = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": [format!("{}@bookTicker", self.symbol.to_lowercase())],
            "id": 1
        });
        tracing::info!(symbol = %self.symbol, "subscribing to source book ticker");
        sink.send(Message::Text(subscribe.to_string())).await?;
        Ok(())
    }

    async fn on_message(&mut self, msg: Message) -> anyhow::Result<()> {
        let Message::Text(text) = msg else {
            return Ok(());
        };
        match parse_book_ticker(&text, self.clock.now()) {
            Some(ticker) => {
                if ticker.validate().is_err() {
                    tracing::warn!(
                        bid = %ticker.bid_px,
                        ask = %ticker.ask_px,
                        "dropping invalid source tick"
                    );
                    return Ok(());
                }
                // Receiver gone means shutdown; nothing to do here.
                let _ = self.tx.send(Some(ticker));
            }
            None => {
                tracing::debug!(frame = %text, "non-ticker source frame ignored");
            }
        }
        Ok(())
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        match &state {
            ConnectionState::Connected => {
                tracing::info!(symbol = %self.symbol, "source stream connected");
            }
            ConnectionState::Disconnected { reason } => {
                tracing::warn!(symbol = %self.symbol, reason, "source stream disconnected");
            }
            ConnectionState::Reconnecting { attempt } => {
                tracing::info!(symbol = %self.symbol, attempt, "source stream reconnecting");
            }
            ConnectionState::Failed { reason } => {
                tracing::error!(symbol = %self.symbol, reason, "source stream failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"u": 400900217, "s": "ADAUSDT", "b": "0.49990000",
        "B": "31.21000000", "a": "0.50010000", "A": "40.66000000"}"#;

    #[test]
    fn test_parse_valid_frame() {
        let ticker = parse_book_ticker(FRAME, 100.0).unwrap();
        assert_eq!(ticker.symbol, Symbol::new("ADAUSDT"));
        assert_eq!(ticker.bid_px, Price::from(0.4999));
        assert_eq!(ticker.ask_px, Price::from(0.5001));
        assert_eq!(ticker.bid_qty, Quantity::from(31.21));
        assert_eq!(ticker.ask_qty, Quantity::from(40.66));
        assert_eq!(ticker.ts, 100.0);
        assert!(ticker.validate().is_ok());
    }

    #[test]
    fn test_lowercase_symbol_normalized() {
        let frame = r#"{"s": "adausdt", "b": "0.4999", "B": "1", "a": "0.5001", "A": "1"}"#;
        let ticker = parse_book_ticker(frame, 0.0).unwrap();
        assert_eq!(ticker.symbol, Symbol::new("ADAUSDT"));
    }

    #[test]
    fn test_subscription_confirmation_ignored() {
        assert!(parse_book_ticker(r#"{"result": null, "id": 1}"#, 0.0).is_none());
    }

    #[test]
    fn test_garbage_ignored() {
        assert!(parse_book_ticker("not json at all", 0.0).is_none());
        assert!(parse_book_ticker(
            r#"{"s": "ADAUSDT", "b": "abc", "B": "1", "a": "0.5", "A": "1"}"#,
            0.0
        )
        .is_none());
    }

    #[test]
    fn test_watch_channel_latest_wins() {
        let (tx, rx) = watch::channel::<Option<BookTicker>>(None);
        let t1 = parse_book_ticker(FRAME, 1.0).unwrap();
        let mut t2 = parse_book_ticker(FRAME, 2.0).unwrap();
        t2.bid_px = Price::from(0.5);
        tx.send(Some(t1)).unwrap();
        tx.send(Some(t2)).unwrap();

        // A slow reader only ever observes the latest tick.
        let seen = rx.borrow().clone().unwrap();
        assert_eq!(seen.ts, 2.0);
        assert_eq!(seen.bid_px, Price::from(0.5));
    }
}
