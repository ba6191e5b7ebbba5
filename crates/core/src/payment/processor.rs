//! Card-network / payment-processor seam.

use async_trait::async_trait;

use super::CardDetails;
use crate::tokens::random_lower_alphanumeric;
use crate::types::PaymentMethodKind;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("declined: {0}")]
    Declined(String),
    #[error("processor unavailable")]
    Unavailable,
}

/// One charge against a confirmed intent.
#[derive(Debug)]
pub struct ChargeRequest<'a> {
    pub intent_id: &'a str,
    pub amount_cents: u64,
    pub currency: &'a str,
    pub method: PaymentMethodKind,
    pub card: Option<&'a CardDetails>,
}

#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    /// Processor-side reference, exposed to the client as `paymentId`.
    pub payment_id: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, request: ChargeRequest<'_>) -> Result<ChargeReceipt, ProcessorError>;

    async fn health(&self) -> bool {
        true
    }
}

/// Approves every charge. Stands in for the card network until settlement
/// is wired up.
#[derive(Debug, Default)]
pub struct SimulatedProcessor;

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn charge(&self, request: ChargeRequest<'_>) -> Result<ChargeReceipt, ProcessorError> {
        tracing::debug!(
            intent_id = request.intent_id,
            method = request.method.as_str(),
            amount_cents = request.amount_cents,
            "Simulated charge approved"
        );
        Ok(ChargeReceipt {
            payment_id: format!("pay_{}", random_lower_alphanumeric(24)),
        })
    }
}
