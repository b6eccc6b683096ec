//! # xmaker-stream
//!
//! Reconnecting stream clients. Both venues speak WebSocket with the same
//! failure modes, so one [`ws::WsSession`] scaffold (backoff with jitter,
//! idle timeout, proactive reconnect before the venue's session lifetime)
//! backs the source book-ticker client and the destination account-stream
//! client.

pub mod account;
pub mod source;
pub mod ws;

pub use account::{parse_account_frame, AccountEvent, AccountStreamClient};
pub use source::{parse_book_ticker, SourceTickerClient};
pub use ws::{ConnectionState, SessionConfig, WsHandler, WsSession};
