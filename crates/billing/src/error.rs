//! Billing error taxonomy.
//!
//! Variants map the failure classes the callers act on: conflicts are safe
//! to drop, validation failures persist nothing, retryable failures recover
//! via provider redelivery or a reconciliation pass, and invariant
//! violations abort the operation before corrupt state is written.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Duplicate webhook event or duplicate refund request. The original
    /// already-applied state stands; never retried by this subsystem.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rejected synchronously; nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transient failure. The billing event stays unprocessed or the refund
    /// transaction stays pending; recovery is redelivery or confirmation.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Programming-contract failure. The operation must abort rather than
    /// persist a corrupted state.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the caller (or the provider, via redelivery) should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Retryable(_) | BillingError::Database(_) | BillingError::Provider(_)
        )
    }
}
