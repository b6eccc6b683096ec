//! Transaction signing.
//!
//! The destination venue returns an unsigned transaction (`tx_hex`) from
//! its build endpoints; the client signs it locally and posts the
//! signature back. [`TxSigner`] is the seam: the production key scheme is
//! supplied by the venue SDK, while [`OperationKeySigner`] implements the
//! HMAC-SHA256 scheme used by the staging environment. Secrets never
//! appear in logs or error messages.

use ring::hmac;

/// Signs venue transactions.
pub trait TxSigner: Send + Sync {
    /// Sign the hex-encoded unsigned transaction, returning the
    /// hex-encoded signed form.
    fn sign(&self, tx_hex: &str) -> anyhow::Result<String>;
}

/// HMAC-SHA256 signer over the operation key.
pub struct OperationKeySigner {
    key: hmac::Key,
}

impl OperationKeySigner {
    /// Create a signer from the raw operation key.
    pub fn new(operation_key: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, operation_key.as_bytes()),
        }
    }
}

impl TxSigner for OperationKeySigner {
    fn sign(&self, tx_hex: &str) -> anyhow::Result<String> {
        let signature = hmac::sign(&self.key, tx_hex.as_bytes());
        Ok(format!("{}{}", tx_hex, hex::encode(signature.as_ref())))
    }
}
