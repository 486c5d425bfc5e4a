//! Submission port (the destination budgeting system).

use std::time::Duration;

use crate::domain::{ProcessingState, Transaction, TransactionId};
use crate::dto::SubmissionReceipt;

/// Error type for submissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited by the destination system")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Rejected by the destination system: {message}")]
    Validation {
        transaction_ids: Vec<TransactionId>,
        message: String,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SubmissionError {
    /// Transient failures a port may retry; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Port trait for the destination system.
///
/// Implementations own retry/backoff of transient failures; the submission
/// service calls each transaction exactly once.
#[async_trait::async_trait]
pub trait SubmissionPort: Send + Sync {
    async fn submit(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
        destination_account_id: &str,
    ) -> Result<SubmissionReceipt, SubmissionError>;
}
