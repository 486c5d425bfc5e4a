//! Error types for the ledger sync pipeline.

use std::time::Duration;

use chrono::NaiveDate;

/// Domain-level errors (malformed input). Local and never retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Account id cannot be empty")]
    EmptyAccountId,

    #[error("External transaction id cannot be empty")]
    EmptyExternalId,

    #[error("Import batch sequence must be positive")]
    InvalidBatchSequence,

    #[error("Transaction date is missing")]
    MissingDate,

    #[error("Transaction date {0} is in the future")]
    FutureDate(NaiveDate),

    #[error("Transaction description cannot be empty")]
    EmptyDescription,

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Violated precondition of a processing-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Transaction is flagged as a duplicate")]
    Duplicate,

    #[error("Transaction was already submitted")]
    AlreadySubmitted,

    #[error("Transaction is not categorized")]
    NotCategorized,

    #[error("Transaction has no category")]
    MissingCategory,

    #[error("Transaction has no payee name")]
    MissingPayee,

    #[error("No destination account is mapped for this source account")]
    MissingDestinationAccount,
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// A call that did not finish because the caller gave up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Application-level errors returned by the pipeline services.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("External system error: {0}")]
    External(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for PipelineError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => PipelineError::BadRequest(e.to_string()),
            RepoError::NotFound => PipelineError::NotFound("Resource not found".into()),
            RepoError::Database(e) => PipelineError::Internal(e),
            RepoError::Transaction(e) => PipelineError::Internal(e),
            RepoError::Conflict(e) => PipelineError::BadRequest(e),
        }
    }
}

impl From<DomainError> for PipelineError {
    fn from(err: DomainError) -> Self {
        PipelineError::BadRequest(err.to_string())
    }
}
