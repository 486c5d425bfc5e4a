//! Processing state: the mutable workflow record of one transaction.
//!
//! Status only ever moves forward:
//!
//! ```text
//! Imported ──(category assigned)──▶ Categorized ──(submitted)──▶ Submitted
//! ```
//!
//! A `Categorized` state always has an effective category. Effective values
//! (override over suggestion) are computed on every read and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::{CategoryOverride, CategorySuggestion};
use super::confidence::ConfidenceScore;
use super::ids::TransactionId;
use crate::dto::SubmissionReceipt;
use crate::error::{DomainError, TransitionError};

/// Lifecycle stage of a transaction. Ordered: `Imported < Categorized < Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Imported,
    Categorized,
    Submitted,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 3] = [
        ProcessingStatus::Imported,
        ProcessingStatus::Categorized,
        ProcessingStatus::Submitted,
    ];
}

impl AsRef<str> for ProcessingStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Imported => "IMPORTED",
            Self::Categorized => "CATEGORIZED",
            Self::Submitted => "SUBMITTED",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IMPORTED" => Ok(Self::Imported),
            "CATEGORIZED" => Ok(Self::Categorized),
            "SUBMITTED" => Ok(Self::Submitted),
            other => Err(DomainError::ValidationError(format!(
                "Unknown processing status: {}",
                other
            ))),
        }
    }
}

/// Flat, persistence-friendly view of a [`ProcessingState`].
///
/// Adapters read and write this; the domain type keeps its fields private so
/// transitions can only happen through its methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStateRecord {
    pub transaction_id: TransactionId,
    pub status: ProcessingStatus,
    pub is_duplicate: bool,
    pub suggested_payee_name: Option<String>,
    pub suggested_category: Option<String>,
    pub suggested_memo: Option<String>,
    pub category_confidence: Option<ConfidenceScore>,
    pub payee_confidence: Option<ConfidenceScore>,
    pub override_payee_name: Option<String>,
    pub override_category: Option<String>,
    pub override_memo: Option<String>,
    pub destination_transaction_id: Option<String>,
    pub destination_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Workflow record, one per [`TransactionId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProcessingStateRecord", into = "ProcessingStateRecord")]
pub struct ProcessingState {
    record: ProcessingStateRecord,
}

fn resolve<'a>(
    override_value: &'a Option<String>,
    suggested: &'a Option<String>,
) -> Option<&'a str> {
    override_value.as_deref().or(suggested.as_deref())
}

impl ProcessingState {
    /// Initial state of a freshly imported transaction.
    pub fn new(transaction_id: TransactionId, created_at: DateTime<Utc>) -> Self {
        Self {
            record: ProcessingStateRecord {
                transaction_id,
                status: ProcessingStatus::Imported,
                is_duplicate: false,
                suggested_payee_name: None,
                suggested_category: None,
                suggested_memo: None,
                category_confidence: None,
                payee_confidence: None,
                override_payee_name: None,
                override_category: None,
                override_memo: None,
                destination_transaction_id: None,
                destination_account_id: None,
                created_at,
                processed_at: None,
                submitted_at: None,
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn transaction_id(&self) -> &TransactionId {
        &self.record.transaction_id
    }

    pub fn status(&self) -> ProcessingStatus {
        self.record.status
    }

    pub fn is_duplicate(&self) -> bool {
        self.record.is_duplicate
    }

    pub fn is_submitted(&self) -> bool {
        self.record.status == ProcessingStatus::Submitted
    }

    pub fn suggested_category(&self) -> Option<&str> {
        self.record.suggested_category.as_deref()
    }

    pub fn suggested_payee_name(&self) -> Option<&str> {
        self.record.suggested_payee_name.as_deref()
    }

    pub fn suggested_memo(&self) -> Option<&str> {
        self.record.suggested_memo.as_deref()
    }

    pub fn category_confidence(&self) -> Option<ConfidenceScore> {
        self.record.category_confidence
    }

    pub fn payee_confidence(&self) -> Option<ConfidenceScore> {
        self.record.payee_confidence
    }

    pub fn override_category(&self) -> Option<&str> {
        self.record.override_category.as_deref()
    }

    pub fn override_payee_name(&self) -> Option<&str> {
        self.record.override_payee_name.as_deref()
    }

    pub fn override_memo(&self) -> Option<&str> {
        self.record.override_memo.as_deref()
    }

    pub fn destination_transaction_id(&self) -> Option<&str> {
        self.record.destination_transaction_id.as_deref()
    }

    pub fn destination_account_id(&self) -> Option<&str> {
        self.record.destination_account_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.record.processed_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.record.submitted_at
    }

    /// Returns the flat record for persistence.
    pub fn record(&self) -> &ProcessingStateRecord {
        &self.record
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Effective values (override wins over suggestion)
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn effective_category(&self) -> Option<&str> {
        resolve(&self.record.override_category, &self.record.suggested_category)
    }

    pub fn effective_payee_name(&self) -> Option<&str> {
        resolve(
            &self.record.override_payee_name,
            &self.record.suggested_payee_name,
        )
    }

    pub fn effective_memo(&self) -> Option<&str> {
        resolve(&self.record.override_memo, &self.record.suggested_memo)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Records an automated suggestion. Returns `true` if status advanced to
    /// `Categorized`.
    ///
    /// An inconclusive suggestion (no category) never erases the category of
    /// an already categorized state; it is ignored in that case.
    pub fn apply_suggestion(
        &mut self,
        suggestion: CategorySuggestion,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.is_submitted() {
            return Err(TransitionError::AlreadySubmitted);
        }
        let suggestion = suggestion.normalized();
        self.record.processed_at = Some(now);

        if !suggestion.has_category() && self.record.status == ProcessingStatus::Categorized {
            return Ok(false);
        }

        self.record.suggested_category = suggestion.category_id;
        self.record.suggested_payee_name = suggestion.payee_name;
        self.record.suggested_memo = suggestion.memo;
        self.record.category_confidence = suggestion.confidence;
        self.record.payee_confidence = suggestion.payee_confidence;

        Ok(self.advance_if_categorized())
    }

    /// Applies a user override. Only fields present in `change` are written.
    /// Returns `true` if status advanced to `Categorized`.
    pub fn apply_override(&mut self, change: CategoryOverride) -> Result<bool, TransitionError> {
        if self.is_submitted() {
            return Err(TransitionError::AlreadySubmitted);
        }
        let change = change.normalized();
        if change.category_id.is_some() {
            self.record.override_category = change.category_id;
        }
        if change.payee_name.is_some() {
            self.record.override_payee_name = change.payee_name;
        }
        if change.memo.is_some() {
            self.record.override_memo = change.memo;
        }
        Ok(self.advance_if_categorized())
    }

    /// Sets or clears the duplicate flag.
    pub fn set_duplicate(&mut self, is_duplicate: bool) -> Result<(), TransitionError> {
        if self.is_submitted() {
            return Err(TransitionError::AlreadySubmitted);
        }
        self.record.is_duplicate = is_duplicate;
        Ok(())
    }

    /// Checks every precondition of `Categorized → Submitted`.
    ///
    /// The duplicate flag is checked first and independently of status.
    pub fn check_submittable(
        &self,
        destination_account_id: Option<&str>,
    ) -> Result<(), TransitionError> {
        if self.record.is_duplicate {
            return Err(TransitionError::Duplicate);
        }
        if self.is_submitted() {
            return Err(TransitionError::AlreadySubmitted);
        }
        if self.effective_category().is_none() {
            return Err(TransitionError::MissingCategory);
        }
        if self.record.status != ProcessingStatus::Categorized {
            return Err(TransitionError::NotCategorized);
        }
        if self.effective_payee_name().is_none() {
            return Err(TransitionError::MissingPayee);
        }
        if destination_account_id.is_none_or(|a| a.trim().is_empty()) {
            return Err(TransitionError::MissingDestinationAccount);
        }
        Ok(())
    }

    /// Records a successful submission and moves to `Submitted`.
    pub fn mark_submitted(
        &mut self,
        destination_account_id: &str,
        receipt: &SubmissionReceipt,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check_submittable(Some(destination_account_id))?;
        self.record.destination_account_id = Some(destination_account_id.to_string());
        self.record.destination_transaction_id = Some(receipt.destination_transaction_id.clone());
        self.record.submitted_at = Some(now);
        self.record.status = ProcessingStatus::Submitted;
        Ok(())
    }

    fn advance_if_categorized(&mut self) -> bool {
        if self.record.status == ProcessingStatus::Imported && self.effective_category().is_some() {
            self.record.status = ProcessingStatus::Categorized;
            return true;
        }
        false
    }
}

impl From<ProcessingStateRecord> for ProcessingState {
    fn from(record: ProcessingStateRecord) -> Self {
        Self { record }
    }
}

impl From<ProcessingState> for ProcessingStateRecord {
    fn from(state: ProcessingState) -> Self {
        state.record
    }
}
