//! Destination venue REST client.
//!
//! Orders reach the venue in two hops: a build endpoint returns an
//! unsigned transaction, and a submit endpoint accepts the locally signed
//! form. Cancels follow the same build/submit shape. Every response is
//! classified into retryable ([`VenueError::Transient`]) or terminal
//! ([`VenueError::Terminal`]) so the outbox worker knows whether to back
//! off or give up.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Destination venue failure, classified for retry policy.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Network drop, timeout, rate limiting, or server error. Retryable.
    #[error("transient venue error: {message}")]
    Transient { message: String },
    /// Validation or authorization failure. Never retried.
    #[error("terminal venue error ({status}): {message}")]
    Terminal { status: u16, message: String },
}

impl VenueError {
    /// Returns `true` when the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient { .. })
    }

    /// Classify an HTTP status plus body into a venue error.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            VenueError::Transient {
                message: format!("HTTP {status}: {body}"),
            }
        } else {
            VenueError::Terminal {
                status: status.as_u16(),
                message: body.to_string(),
            }
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures are always retryable.
        VenueError::Transient {
            message: err.to_string(),
        }
    }
}

/// Build-order request body.
#[derive(Debug, Serialize)]
pub struct BuildOrderRequest<'a> {
    /// Trading pair.
    pub symbol: &'a str,
    /// "buy" or "sell".
    pub side: &'a str,
    /// "limit" or "market".
    #[serde(rename = "type")]
    pub order_type: &'a str,
    /// Order quantity, base units.
    pub quantity: f64,
    /// Limit price (omitted for market orders).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Build-order response: the venue's order id plus the unsigned tx.
#[derive(Debug, Deserialize)]
pub struct BuildOrderResponse {
    /// Venue-assigned order id.
    pub order_id: String,
    /// Hex-encoded unsigned transaction.
    pub tx_hex: String,
}

/// Submit-order request body.
#[derive(Debug, Serialize)]
pub struct SubmitOrderRequest<'a> {
    /// Venue order id from the build step.
    pub order_id: &'a str,
    /// Hex-encoded signed transaction.
    pub signed_tx: &'a str,
}

/// Submit response.
#[derive(Debug, Deserialize)]
pub struct SubmitOrderResponse {
    /// Venue order id, echoed back.
    pub order_id: String,
    /// On-chain transaction hash, when available.
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// One open order as reported by the venue.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueOpenOrder {
    /// Venue order id.
    pub order_id: String,
    /// Trading pair.
    pub symbol: String,
    /// "buy" or "sell".
    pub side: String,
    /// Limit price.
    pub price: f64,
    /// Remaining quantity.
    pub quantity: f64,
}

/// REST client for the destination venue.
///
/// Reuses one `reqwest::Client` for connection pooling. Authentication is
/// an API key header; request signing happens at the transaction level,
/// not the HTTP level.
pub struct DestClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DestClient {
    /// Create a client with connect/request timeouts.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build a new order: POST `/order/build`.
    pub async fn build_order(
        &self,
        req: &BuildOrderRequest<'_>,
    ) -> Result<BuildOrderResponse, VenueError> {
        self.post("/order/build", req).await
    }

    /// Submit a signed order: POST `/order/submit`.
    pub async fn submit_order(
        &self,
        req: &SubmitOrderRequest<'_>,
    ) -> Result<SubmitOrderResponse, VenueError> {
        self.post("/order/submit", req).await
    }

    /// Build a cancel for an existing order: POST `/order/cancel/build`.
    pub async fn build_cancel(
        &self,
        order_id: &str,
    ) -> Result<BuildOrderResponse, VenueError> {
        self.post(
            "/order/cancel/build",
            &serde_json::json!({ "order_id": order_id }),
        )
        .await
    }

    /// Submit a signed cancel: POST `/order/cancel/submit`.
    pub async fn submit_cancel(
        &self,
        req: &SubmitOrderRequest<'_>,
    ) -> Result<SubmitOrderResponse, VenueError> {
        self.post("/order/cancel/submit", req).await
    }

    /// All open orders on the venue: GET `/order/open`.
    pub async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, VenueError> {
        let url = format!("{}/order/open", self.base_url);
        tracing::debug!(endpoint = "/order/open", "venue GET");
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, VenueError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(endpoint = path, "venue POST");
        let resp = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::parse_response(resp).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, VenueError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(VenueError::from_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| VenueError::Terminal {
            status: status.as_u16(),
            message: format!("undecodable response: {e}"),
        })
    }
}
