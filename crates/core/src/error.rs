use serde::Serialize;

use crate::types::Timestamp;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Validation failed for {} field(s)", .0.len())]
    InvalidFields(Vec<FieldViolation>),

    #[error("Invalid verification code ({attempts_remaining} attempts remaining)")]
    InvalidCode { attempts_remaining: u32 },

    #[error("Payment method '{0}' is not allowed for this intent")]
    InvalidPaymentMethod(String),

    #[error("Card validation failed")]
    InvalidCard(Vec<String>),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Idempotency key already used with different contents")]
    IdempotencyConflict,

    /// `retry_at` is `None` when the limit is attached to a single resource
    /// instance that has already been discarded.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_at: Option<Timestamp>,
    },

    #[error("Too many attempts for {entity}")]
    AttemptsExceeded { entity: &'static str },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Consent required: {0}")]
    ConsentRequired(String),

    #[error("Blocked by fraud policy (score {score})")]
    FraudBlocked { score: u8 },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} has expired")]
    Expired { entity: &'static str },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
