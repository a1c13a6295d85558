use thiserror::Error;

pub type FinanceResult<T> = Result<T, FinanceError>;

#[derive(Debug, Error)]
pub enum FinanceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A reconciliation write raced a concurrent transaction; re-run the pass.
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
