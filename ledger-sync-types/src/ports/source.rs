//! Raw transaction source port (the bank feed).

use std::time::Duration;

use crate::domain::AccountId;
use crate::dto::{DateRange, RawTransaction};

/// Error type for bank-feed operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited by the bank feed")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl SourceError {
    /// Connectivity and rate-limit errors are worth retrying; the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RateLimited { .. })
    }

    /// Server-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Port trait for bank feeds.
#[async_trait::async_trait]
pub trait RawTransactionSource: Send + Sync {
    async fn fetch(
        &self,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<RawTransaction>, SourceError>;
}
