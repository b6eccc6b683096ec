//! Venue gateway: the seam between the outbox worker and the venue.
//!
//! [`VenueGateway`] abstracts the build→sign→submit choreography so the
//! dispatch path can be exercised against a scripted implementation in
//! tests and a no-op paper implementation in paper mode.

use async_trait::async_trait;

use crate::client::{
    BuildOrderRequest, DestClient, SubmitOrderRequest, VenueError, VenueOpenOrder,
};
use crate::signing::TxSigner;

/// Order submission request assembled from an outbox payload.
#[derive(Debug, Clone)]
pub struct GatewaySubmit {
    /// Our client order id (for logging and correlation).
    pub order_id: String,
    /// Trading pair.
    pub symbol: String,
    /// "buy" or "sell".
    pub side: String,
    /// "limit" or "market".
    pub order_type: String,
    /// Limit price, if any.
    pub price: Option<f64>,
    /// Order quantity.
    pub quantity: f64,
}

/// Successful submission ack.
#[derive(Debug, Clone)]
pub struct GatewayAck {
    /// Venue-assigned order id.
    pub external_order_id: String,
}

/// Unified venue order operations.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Build, sign, and submit a new order.
    async fn submit(&self, req: &GatewaySubmit) -> Result<GatewayAck, VenueError>;

    /// Build, sign, and submit a cancel for a venue order id.
    async fn cancel(&self, external_order_id: &str) -> Result<(), VenueError>;

    /// All open orders on the venue (for the unregistered-order sweep).
    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, VenueError>;
}

/// Live gateway: REST build → local sign → REST submit.
pub struct DestGateway {
    client: DestClient,
    signer: Box<dyn TxSigner>,
}

impl DestGateway {
    /// Wire a gateway over a REST client and a signer.
    pub fn new(client: DestClient, signer: Box<dyn TxSigner>) -> Self {
        Self { client, signer }
    }
}

#[async_trait]
impl VenueGateway for DestGateway {
    async fn submit(&self, req: &GatewaySubmit) -> Result<GatewayAck, VenueError> {
        let build = self
            .client
            .build_order(&BuildOrderRequest {
                symbol: &req.symbol,
                side: &req.side,
                order_type: &req.order_type,
                quantity: req.quantity,
                price: req.price,
            })
            .await?;

        let signed_tx = self.signer.sign(&build.tx_hex).map_err(|e| {
            // A signing failure is local and permanent for this payload.
            VenueError::Terminal {
                status: 0,
                message: format!("signing failed: {e}"),
            }
        })?;

        let submit = self
            .client
            .submit_order(&SubmitOrderRequest {
                order_id: &build.order_id,
                signed_tx: &signed_tx,
            })
            .await?;

        tracing::info!(
            order_id = %req.order_id,
            external_order_id = %submit.order_id,
            tx_hash = ?submit.tx_hash,
            "order submitted to venue"
        );
        Ok(GatewayAck {
            external_order_id: submit.order_id,
        })
    }

    async fn cancel(&self, external_order_id: &str) -> Result<(), VenueError> {
        let build = self.client.build_cancel(external_order_id).await?;
        let signed_tx = self.signer.sign(&build.tx_hex).map_err(|e| VenueError::Terminal {
            status: 0,
            message: format!("signing failed: {e}"),
        })?;
        self.client
            .submit_cancel(&SubmitOrderRequest {
                order_id: external_order_id,
                signed_tx: &signed_tx,
            })
            .await?;

        tracing::info!(external_order_id, "cancel submitted to venue");
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, VenueError> {
        self.client.open_orders().await
    }
}

/// Paper gateway: acknowledges everything locally without touching the
/// network. Orders never rest anywhere, so the open-order sweep sees an
/// empty venue.
pub struct PaperGateway {
    counter: std::sync::atomic::AtomicU64,
}

impl PaperGateway {
    /// Create a paper gateway.
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueGateway for PaperGateway {
    async fn submit(&self, req: &GatewaySubmit) -> Result<GatewayAck, VenueError> {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let external = format!("paper-{n}");
        tracing::info!(
            order_id = %req.order_id,
            external_order_id = %external,
            "paper submit acknowledged"
        );
        Ok(GatewayAck {
            external_order_id: external,
        })
    }

    async fn cancel(&self, external_order_id: &str) -> Result<(), VenueError> {
        tracing::info!(external_order_id, "paper cancel acknowledged");
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, VenueError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_is_object_safe() {
        fn _assert_object_safe(_g: &dyn VenueGateway) {}
    }

    #[tokio::test]
    async fn test_paper_gateway_acks_with_unique_ids() {
        let gw = PaperGateway::new();
        let req = GatewaySubmit {
            order_id: "xm_01_000000".into(),
            symbol: "ADAUSDM".into(),
            side: "buy".into(),
            order_type: "limit".into(),
            price: Some(0.4998),
            quantity: 226.0,
        };
        let a = gw.submit(&req).await.unwrap();
        let b = gw.submit(&req).await.unwrap();
        assert_ne!(a.external_order_id, b.external_order_id);
    }

    #[tokio::test]
    async fn test_paper_gateway_cancel_and_sweep() {
        let gw = PaperGateway::new();
        gw.cancel("paper-1").await.unwrap();
        assert!(gw.open_orders().await.unwrap().is_empty());
    }
}
