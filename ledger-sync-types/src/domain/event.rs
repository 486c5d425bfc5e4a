//! Pipeline events.
//!
//! Services only describe what happened; delivery is up to whoever consumes
//! these values (the outbox relay, logs, a UI).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::confidence::ConfidenceScore;
use super::ids::{AccountId, ImportBatchId, TransactionId};
use super::processing_state::ProcessingStatus;

/// What changed in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    ImportCompleted {
        account_id: AccountId,
        batch_id: ImportBatchId,
        imported_count: usize,
        duplicate_count: usize,
        rejected_count: usize,
    },
    TransactionCategorized {
        transaction_id: TransactionId,
        category_id: Option<String>,
        confidence: Option<ConfidenceScore>,
        status: ProcessingStatus,
    },
    CategorizationCompleted {
        categorized_count: usize,
        average_confidence: Option<ConfidenceScore>,
    },
    CategoryOverridden {
        transaction_id: TransactionId,
        category_id: Option<String>,
        status: ProcessingStatus,
    },
    CategoryBulkUpdated {
        updated_count: usize,
        category_id: String,
    },
    TransactionSubmitted {
        transaction_id: TransactionId,
        destination_transaction_id: String,
    },
    SubmissionCompleted {
        submitted_count: usize,
        failed_count: usize,
    },
}

impl EventKind {
    /// Dotted event name used by subscribers and the outbox.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ImportCompleted { .. } => "import.completed",
            Self::TransactionCategorized { .. } => "transaction.categorized",
            Self::CategorizationCompleted { .. } => "categorization.completed",
            Self::CategoryOverridden { .. } => "category.overridden",
            Self::CategoryBulkUpdated { .. } => "category.bulk_updated",
            Self::TransactionSubmitted { .. } => "transaction.submitted",
            Self::SubmissionCompleted { .. } => "submission.completed",
        }
    }
}

/// An event with identity and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// Delivery status of an event stored in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl AsRef<str> for DeliveryStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// An outbox row: an event plus its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Delivery attempts after which a failed event is left alone.
    pub const MAX_ATTEMPTS: i32 = 5;

    /// Never attempted, or failed with attempts left and last tried at or
    /// before `retry_cutoff`.
    pub fn is_due(&self, retry_cutoff: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Completed => false,
            DeliveryStatus::Failed => {
                self.attempts < Self::MAX_ATTEMPTS
                    && self.processed_at.is_none_or(|at| at <= retry_cutoff)
            }
        }
    }

    /// No further delivery will be tried.
    pub fn is_exhausted(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.attempts >= Self::MAX_ATTEMPTS
    }

    pub fn from_event(event: &PipelineEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: event.id,
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            status: DeliveryStatus::Pending,
            created_at: event.occurred_at,
            processed_at: None,
            attempts: 0,
            last_error: None,
        })
    }
}
