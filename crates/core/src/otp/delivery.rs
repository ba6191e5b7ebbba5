//! Email/SMS gateway seam for verification codes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::contact::mask_contact;
use crate::types::{CodePurpose, ContactMethod, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("gateway rejected the message: {0}")]
    Rejected(String),
    #[error("gateway unavailable")]
    Unavailable,
}

/// A message handed to the gateway.
#[derive(Debug, Clone)]
pub struct CodeMessage<'a> {
    pub method: ContactMethod,
    /// Normalised contact value.
    pub contact: &'a str,
    pub code: &'a str,
    pub purpose: CodePurpose,
    pub expires_at: Timestamp,
}

/// Delivers a verification code to the person who requested it.
///
/// Implementations must not log the code.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, message: CodeMessage<'_>) -> Result<(), DeliveryError>;

    /// Whether the gateway is currently reachable.
    async fn health(&self) -> bool {
        true
    }
}

/// Development gateway: records that a message would have been sent.
#[derive(Debug, Default)]
pub struct LoggingDelivery;

#[async_trait]
impl CodeDelivery for LoggingDelivery {
    async fn deliver(&self, message: CodeMessage<'_>) -> Result<(), DeliveryError> {
        tracing::info!(
            method = message.method.as_str(),
            contact = %mask_contact(message.contact),
            purpose = message.purpose.as_str(),
            expires_at = %message.expires_at,
            "Verification code dispatched"
        );
        Ok(())
    }
}

/// A code captured by [`RecordingDelivery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredCode {
    pub contact: String,
    pub code: String,
    pub purpose: CodePurpose,
}

/// In-process gateway that keeps delivered codes in memory so integration
/// tests can complete a verification round trip. Can be switched into a
/// failing state to exercise gateway outages.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<DeliveredCode>>,
    failing: AtomicBool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Most recent code delivered to `contact` (normalised form).
    pub fn last_code_for(&self, contact: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|d| d.contact == contact)
            .map(|d| d.code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CodeDelivery for RecordingDelivery {
    async fn deliver(&self, message: CodeMessage<'_>) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Unavailable);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DeliveredCode {
                contact: message.contact.to_string(),
                code: message.code.to_string(),
                purpose: message.purpose,
            });
        Ok(())
    }

    async fn health(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
