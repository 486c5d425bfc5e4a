//! Transaction domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ImportBatchId, TransactionId};
use super::money::{Currency, Money};
use crate::dto::RawTransaction;
use crate::error::DomainError;

/// The other side of a transaction, as reported by the bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub name: Option<String>,
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
}

impl Counterparty {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.account_number.is_none() && self.bank_code.is_none()
    }
}

/// A financial movement as observed at the source.
///
/// Transactions are immutable once created. Categorization and submission
/// only ever touch the matching `ProcessingState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Booking date reported by the bank
    pub date: NaiveDate,
    pub amount: Money,
    pub counterparty: Counterparty,
    /// Free-text message for the recipient
    pub message: Option<String>,
    /// Free-text comment attached by the bank or account owner
    pub comment: Option<String>,
    /// Bank-specific transaction type tag (e.g. "card payment")
    pub transaction_type: Option<String>,
    /// Import run that created this record
    pub import_batch: ImportBatchId,
    pub imported_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a transaction from raw feed data.
    ///
    /// # Validation
    /// - external id must be non-empty
    /// - date must be present and not after `today`
    /// - currency must be an ISO code
    /// - at least one of message, counterparty name or comment must be non-blank
    pub fn from_raw(
        batch: &ImportBatchId,
        raw: RawTransaction,
        today: NaiveDate,
        imported_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let id = TransactionId::new(batch.account_id().clone(), raw.external_id)?;
        let date = raw.date.ok_or(DomainError::MissingDate)?;
        if date > today {
            return Err(DomainError::FutureDate(date));
        }
        let currency = Currency::new(&raw.currency)?;

        let tx = Self {
            id,
            date,
            amount: Money::new(raw.amount, currency),
            counterparty: Counterparty {
                name: non_blank(raw.counterparty_name),
                account_number: non_blank(raw.counterparty_account),
                bank_code: non_blank(raw.counterparty_bank_code),
            },
            message: non_blank(raw.message),
            comment: non_blank(raw.comment),
            transaction_type: non_blank(raw.transaction_type),
            import_batch: batch.clone(),
            imported_at,
        };

        if tx.description().is_none() {
            return Err(DomainError::EmptyDescription);
        }
        Ok(tx)
    }

    /// Best human-readable description: message, else counterparty name, else comment.
    pub fn description(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.counterparty.name.as_deref())
            .or(self.comment.as_deref())
    }

    /// All free-text fields joined, used for text matching.
    pub fn searchable_text(&self) -> String {
        [
            self.message.as_deref(),
            self.counterparty.name.as_deref(),
            self.comment.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// Trims a free-text field, mapping blank strings to `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
