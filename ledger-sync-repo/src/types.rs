//! SQLite row types and their conversion into domain types.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use ledger_sync_types::{
    AccountId, ConfidenceScore, Counterparty, Currency, DeliveryStatus, ImportBatchId, Money,
    OutboxEvent, ProcessingState, ProcessingStateRecord, ProcessingStatus, RepoError,
    Transaction, TransactionId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs (derive FromRow for automatic mapping)
// ─────────────────────────────────────────────────────────────────────────────

/// Transaction row from database.
#[derive(FromRow)]
pub struct DbTransaction {
    pub account_id: String,
    pub external_id: String,
    pub booking_date: String,
    pub amount: i64,
    pub currency: String,
    pub counterparty_name: Option<String>,
    pub counterparty_account: Option<String>,
    pub counterparty_bank_code: Option<String>,
    pub message: Option<String>,
    pub comment: Option<String>,
    pub transaction_type: Option<String>,
    pub batch_sequence: i64,
    pub imported_at: String,
}

/// Processing state row from database.
#[derive(FromRow)]
pub struct DbProcessingState {
    pub account_id: String,
    pub external_id: String,
    pub status: String,
    pub is_duplicate: i64,
    pub suggested_payee_name: Option<String>,
    pub suggested_category: Option<String>,
    pub suggested_memo: Option<String>,
    pub category_confidence: Option<f64>,
    pub payee_confidence: Option<f64>,
    pub override_payee_name: Option<String>,
    pub override_category: Option<String>,
    pub override_memo: Option<String>,
    pub destination_transaction_id: Option<String>,
    pub destination_account_id: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub submitted_at: Option<String>,
}

/// Outbox event row from database.
#[derive(FromRow)]
pub struct DbOutboxEvent {
    pub id: String,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Count-only row for queries.
#[derive(FromRow)]
pub struct DbCount {
    pub count: i64,
}

/// Allocated batch sequence.
#[derive(FromRow)]
pub struct DbSequence {
    pub sequence: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepoError::Database(e.to_string()))
}

pub fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepoError> {
    s.as_deref().map(parse_timestamp).transpose()
}

pub fn parse_date(s: &str) -> Result<NaiveDate, RepoError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| RepoError::Database(e.to_string()))
}

pub fn parse_status(s: &str) -> Result<ProcessingStatus, RepoError> {
    s.parse()
        .map_err(|_| RepoError::Database(format!("Unknown processing status: {}", s)))
}

pub fn parse_delivery_status(s: &str) -> DeliveryStatus {
    match s {
        "COMPLETED" => DeliveryStatus::Completed,
        "FAILED" => DeliveryStatus::Failed,
        _ => DeliveryStatus::Pending,
    }
}

fn transaction_id(account_id: &str, external_id: &str) -> Result<TransactionId, RepoError> {
    Ok(TransactionId::new(AccountId::new(account_id)?, external_id)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain conversion
// ─────────────────────────────────────────────────────────────────────────────

impl DbTransaction {
    /// Convert database row to domain Transaction.
    pub fn into_domain(self) -> Result<Transaction, RepoError> {
        let id = transaction_id(&self.account_id, &self.external_id)?;
        let sequence = u64::try_from(self.batch_sequence)
            .map_err(|e| RepoError::Database(e.to_string()))?;
        let import_batch = ImportBatchId::new(id.account_id().clone(), sequence)?;
        let currency = Currency::new(&self.currency)?;

        Ok(Transaction {
            id,
            date: parse_date(&self.booking_date)?,
            amount: Money::new(self.amount, currency),
            counterparty: Counterparty {
                name: self.counterparty_name,
                account_number: self.counterparty_account,
                bank_code: self.counterparty_bank_code,
            },
            message: self.message,
            comment: self.comment,
            transaction_type: self.transaction_type,
            import_batch,
            imported_at: parse_timestamp(&self.imported_at)?,
        })
    }
}

impl DbProcessingState {
    /// Convert database row to domain ProcessingState.
    pub fn into_domain(self) -> Result<ProcessingState, RepoError> {
        let record = ProcessingStateRecord {
            transaction_id: transaction_id(&self.account_id, &self.external_id)?,
            status: parse_status(&self.status)?,
            is_duplicate: self.is_duplicate != 0,
            suggested_payee_name: self.suggested_payee_name,
            suggested_category: self.suggested_category,
            suggested_memo: self.suggested_memo,
            category_confidence: self.category_confidence.map(ConfidenceScore::new),
            payee_confidence: self.payee_confidence.map(ConfidenceScore::new),
            override_payee_name: self.override_payee_name,
            override_category: self.override_category,
            override_memo: self.override_memo,
            destination_transaction_id: self.destination_transaction_id,
            destination_account_id: self.destination_account_id,
            created_at: parse_timestamp(&self.created_at)?,
            processed_at: parse_optional_timestamp(self.processed_at)?,
            submitted_at: parse_optional_timestamp(self.submitted_at)?,
        };
        Ok(ProcessingState::from(record))
    }
}

impl DbOutboxEvent {
    pub fn into_domain(self) -> Result<OutboxEvent, RepoError> {
        let id = uuid::Uuid::parse_str(&self.id).map_err(|e| RepoError::Database(e.to_string()))?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(OutboxEvent {
            id,
            event_type: self.event_type,
            payload,
            status: parse_delivery_status(&self.status),
            created_at: parse_timestamp(&self.created_at)?,
            processed_at: parse_optional_timestamp(self.processed_at)?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}
