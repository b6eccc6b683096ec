//! Generic WebSocket session with automatic reconnection.
//!
//! [`WsSession`] drives the connect/subscribe/read lifecycle shared by the
//! source market-data stream and the destination account stream:
//! exponential backoff with jitter between attempts, an idle timeout that
//! forces a reconnect when the venue goes quiet, and a maximum session age
//! so we reconnect proactively before the venue's ~24 h session limit cuts
//! us off mid-flow. Pings are answered here; everything else is delegated
//! to the [`WsHandler`].

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Sink half of a WebSocket connection, used to send messages.
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Stream half of a WebSocket connection, used to receive messages.
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state events emitted to the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Successfully connected.
    Connected,
    /// Disconnected; the session will reconnect.
    Disconnected {
        /// Human-readable reason.
        reason: String,
    },
    /// Attempting to reconnect (1-based attempt number).
    Reconnecting {
        /// Current attempt.
        attempt: u32,
    },
    /// Retry budget exhausted; the session returns an error.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Session behavior knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_retries: u32,
    /// Reconnect if no frame arrives within this window.
    pub idle_timeout: Duration,
    /// Reconnect proactively once the session reaches this age.
    pub max_session_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            max_retries: 0,
            idle_timeout: Duration::from_secs(180),
            max_session_age: Duration::from_secs(23 * 3600),
        }
    }
}

impl SessionConfig {
    /// Build from the application reconnect configuration.
    pub fn from_reconnect(
        cfg: &xmaker_core::config::ReconnectConfig,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            max_retries: cfg.max_retries,
            idle_timeout,
            max_session_age: Duration::from_secs(cfg.session_max_age_min * 60),
        }
    }
}

/// Trait that stream clients implement for session lifecycle hooks.
#[async_trait::async_trait]
pub trait WsHandler: Send + 'static {
    /// Called after each (re)connect. Use to authenticate and resubscribe.
    async fn on_connect(&mut self, sink: &mut WsSink) -> anyhow::Result<()>;

    /// Called for each received data frame. Errors are logged and the
    /// session keeps reading; decode failures must not kill the stream.
    async fn on_message(&mut self, msg: Message) -> anyhow::Result<()>;

    /// Called on connection state changes.
    fn on_state_change(&mut self, state: ConnectionState);
}

/// Managed WebSocket session with automatic reconnection.
pub struct WsSession {
    url: String,
    config: SessionConfig,
}

impl WsSession {
    /// Create a session for `url`.
    pub fn new(url: String, config: SessionConfig) -> Self {
        Self { url, config }
    }

    /// Run the session until cancelled.
    ///
    /// Returns `Ok(())` on cooperative shutdown and `Err` only when the
    /// retry budget is exhausted.
    pub async fn run<H: WsHandler>(
        &self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if attempt > 0 {
                handler.on_state_change(ConnectionState::Reconnecting { attempt });

                if self.config.max_retries > 0 && attempt > self.config.max_retries {
                    let reason = format!(
                        "exceeded max retries ({}) for {}",
                        self.config.max_retries, self.url
                    );
                    handler.on_state_change(ConnectionState::Failed {
                        reason: reason.clone(),
                    });
                    return Err(anyhow::anyhow!(reason));
                }

                let backoff = calculate_backoff(
                    &self.config.initial_backoff,
                    &self.config.max_backoff,
                    attempt - 1,
                );
                tracing::info!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    url = %self.url,
                    "reconnecting WebSocket"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let ws_stream = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = tokio_tungstenite::connect_async(&self.url) => match result {
                    Ok((stream, _response)) => stream,
                    Err(e) => {
                        tracing::error!(url = %self.url, error = %e, "WebSocket connect failed");
                        handler.on_state_change(ConnectionState::Disconnected {
                            reason: format!("connect failed: {e}"),
                        });
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                }
            };

            let (mut sink, mut stream) = ws_stream.split();
            handler.on_state_change(ConnectionState::Connected);

            if let Err(e) = handler.on_connect(&mut sink).await {
                tracing::error!(url = %self.url, error = %e, "on_connect failed");
                handler.on_state_change(ConnectionState::Disconnected {
                    reason: format!("on_connect failed: {e}"),
                });
                attempt = attempt.saturating_add(1);
                continue;
            }

            match self
                .read_loop(handler, &mut sink, &mut stream, &cancel)
                .await
            {
                ReadOutcome::Cancelled => return Ok(()),
                ReadOutcome::Disconnected(reason) => {
                    handler.on_state_change(ConnectionState::Disconnected { reason });
                    // A session that connected successfully resets the
                    // retry budget.
                    attempt = 1;
                }
            }
        }
    }

    /// Read frames until cancellation, idle timeout, session expiry, or a
    /// connection error.
    async fn read_loop<H: WsHandler>(
        &self,
        handler: &mut H,
        sink: &mut WsSink,
        stream: &mut WsStream,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let session_deadline = tokio::time::Instant::now() + self.config.max_session_age;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                _ = tokio::time::sleep_until(session_deadline) => {
                    tracing::info!(url = %self.url, "session age limit reached, reconnecting");
                    return ReadOutcome::Disconnected("session age limit".to_string());
                }
                frame = tokio::time::timeout(self.config.idle_timeout, stream.next()) => frame,
            };

            let msg = match frame {
                Err(_) => {
                    tracing::warn!(
                        url = %self.url,
                        idle_ms = self.config.idle_timeout.as_millis() as u64,
                        "stream idle, reconnecting"
                    );
                    return ReadOutcome::Disconnected("idle timeout".to_string());
                }
                Ok(None) => return ReadOutcome::Disconnected("stream closed".to_string()),
                Ok(Some(Err(e))) => {
                    tracing::error!(url = %self.url, error = %e, "WebSocket read error");
                    return ReadOutcome::Disconnected(format!("read error: {e}"));
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Ping(data) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        tracing::error!(url = %self.url, error = %e, "pong send failed");
                        return ReadOutcome::Disconnected("pong failed".to_string());
                    }
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    tracing::warn!(url = %self.url, frame = ?frame, "close frame received");
                    return ReadOutcome::Disconnected("server close".to_string());
                }
                other => {
                    if let Err(e) = handler.on_message(other).await {
                        // Decode errors are logged and skipped; they never
                        // kill the connection.
                        tracing::error!(url = %self.url, error = %e, "message handler error");
                    }
                }
            }
        }
    }
}

enum ReadOutcome {
    Cancelled,
    Disconnected(String),
}

/// Exponential backoff with jitter: `initial · 2^attempt` capped at `max`,
/// plus a random 0–50 % of the base.
pub(crate) fn calculate_backoff(initial: &Duration, max: &Duration, attempt: u32) -> Duration {
    let base = initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(*max);

    let jitter_frac = rand::random::<f64>() * 0.5;
    let jitter = Duration::from_secs_f64(base.as_secs_f64() * jitter_frac);

    base + jitter
}
