//! Data Transfer Objects crossing the port boundaries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountId, ProcessingState, ProcessingStatus, Transaction};
use crate::error::DomainError;

// ─────────────────────────────────────────────────────────────────────────────
// Import DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// A transaction exactly as delivered by the bank feed, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Bank-assigned transaction identifier
    pub external_id: String,
    /// Booking date; `None` when the feed omitted it
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Signed amount in smallest currency unit
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub counterparty_name: Option<String>,
    #[serde(default)]
    pub counterparty_account: Option<String>,
    #[serde(default)]
    pub counterparty_bank_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Inclusive range of booking dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DomainError> {
        if from > to {
            return Err(DomainError::ValidationError(format!(
                "Date range start {} is after end {}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Categorization DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Selects transactions for a bulk override.
///
/// All present criteria must match. `description_contains` is a
/// case-insensitive substring match over message, counterparty and comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub description_contains: Option<String>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    #[serde(default)]
    pub status: Option<ProcessingStatus>,
}

impl TransactionFilter {
    pub fn description_contains(text: impl Into<String>) -> Self {
        Self {
            description_contains: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, tx: &Transaction, state: &ProcessingState) -> bool {
        if let Some(account) = &self.account_id {
            if tx.id.account_id() != account {
                return false;
            }
        }
        if let Some(status) = self.status {
            if state.status() != status {
                return false;
            }
        }
        match &self.description_contains {
            Some(needle) => tx
                .searchable_text()
                .to_lowercase()
                .contains(&needle.trim().to_lowercase()),
            None => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// What the destination system returned for an accepted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Identifier assigned by the destination system
    pub destination_transaction_id: String,
    /// Destination-reported status (e.g. "created", "matched")
    pub status: String,
}

/// Number of processing states per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub imported: usize,
    pub categorized: usize,
    pub submitted: usize,
    pub duplicates: usize,
}

impl StatusCounts {
    pub fn record(&mut self, state: &ProcessingState) {
        match state.status() {
            ProcessingStatus::Imported => self.imported += 1,
            ProcessingStatus::Categorized => self.categorized += 1,
            ProcessingStatus::Submitted => self.submitted += 1,
        }
        if state.is_duplicate() {
            self.duplicates += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.imported + self.categorized + self.submitted
    }
}
