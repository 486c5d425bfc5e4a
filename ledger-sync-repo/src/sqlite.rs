//! SQLite store adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::str::FromStr;
use uuid::Uuid;

use ledger_sync_types::{
    AccountId, DateRange, DeliveryStatus, EventOutbox, ImportBatchId, InsertOutcome, OutboxEvent,
    PipelineEvent, ProcessingState, ProcessingStateStore, ProcessingStatus, RepoError,
    Transaction, TransactionId, TransactionStore,
};

use crate::types::{
    DATE_FORMAT, DbCount, DbOutboxEvent, DbProcessingState, DbSequence, DbTransaction,
};

const TRANSACTION_COLUMNS: &str = "account_id, external_id, booking_date, amount, currency, \
     counterparty_name, counterparty_account, counterparty_bank_code, message, comment, \
     transaction_type, batch_sequence, imported_at";

const STATE_COLUMNS: &str = "account_id, external_id, status, is_duplicate, \
     suggested_payee_name, suggested_category, suggested_memo, category_confidence, \
     payee_confidence, override_payee_name, override_category, override_memo, \
     destination_transaction_id, destination_account_id, created_at, processed_at, submitted_at";

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema. Safe to run more than once.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        let ddl = include_str!("../migrations/0001_create_tables.sql");
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        let ddl_outbox = include_str!("../migrations/0002_create_event_outbox.sql");
        sqlx::query(ddl_outbox)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }
}

fn sequence_param(batch_id: &ImportBatchId) -> Result<i64, RepoError> {
    i64::try_from(batch_id.sequence()).map_err(|e| RepoError::Database(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction store
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TransactionStore for SqliteRepo {
    async fn insert_imported(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
    ) -> Result<InsertOutcome, RepoError> {
        if tx.id != *state.transaction_id() {
            return Err(RepoError::Conflict(format!(
                "State {} does not belong to transaction {}",
                state.transaction_id(),
                tx.id
            )));
        }

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        let sql = format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (account_id, external_id) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(tx.id.account_id().as_str())
            .bind(tx.id.external_id())
            .bind(tx.date.format(DATE_FORMAT).to_string())
            .bind(tx.amount.amount())
            .bind(tx.amount.currency().code())
            .bind(&tx.counterparty.name)
            .bind(&tx.counterparty.account_number)
            .bind(&tx.counterparty.bank_code)
            .bind(&tx.message)
            .bind(&tx.comment)
            .bind(&tx.transaction_type)
            .bind(sequence_param(&tx.import_batch)?)
            .bind(tx.imported_at.to_rfc3339())
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Dropping the open transaction rolls it back.
            return Ok(InsertOutcome::AlreadyExists);
        }

        let record = state.record();
        let sql = format!(
            "INSERT INTO processing_states ({STATE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(record.transaction_id.account_id().as_str())
            .bind(record.transaction_id.external_id())
            .bind(record.status.as_ref())
            .bind(i64::from(record.is_duplicate))
            .bind(&record.suggested_payee_name)
            .bind(&record.suggested_category)
            .bind(&record.suggested_memo)
            .bind(record.category_confidence.map(|c| c.value()))
            .bind(record.payee_confidence.map(|c| c.value()))
            .bind(&record.override_payee_name)
            .bind(&record.override_category)
            .bind(&record.override_memo)
            .bind(&record.destination_transaction_id)
            .bind(&record.destination_account_id)
            .bind(record.created_at.to_rfc3339())
            .bind(record.processed_at.map(|t| t.to_rfc3339()))
            .bind(record.submitted_at.map(|t| t.to_rfc3339()))
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        Ok(InsertOutcome::Inserted)
    }

    async fn next_import_batch(&self, account_id: &AccountId) -> Result<ImportBatchId, RepoError> {
        let now = Utc::now().to_rfc3339();

        // Single statement, so concurrent imports of one account never share a sequence.
        let row: DbSequence = sqlx::query_as(
            r#"
            INSERT INTO import_batches (account_id, sequence, created_at)
            SELECT ?, COALESCE(MAX(sequence), 0) + 1, ?
            FROM import_batches WHERE account_id = ?
            RETURNING sequence
            "#,
        )
        .bind(account_id.as_str())
        .bind(&now)
        .bind(account_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let sequence =
            u64::try_from(row.sequence).map_err(|e| RepoError::Database(e.to_string()))?;
        Ok(ImportBatchId::new(account_id.clone(), sequence)?)
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ? AND external_id = ?"
        );
        let row: Option<DbTransaction> = sqlx::query_as(&sql)
            .bind(id.account_id().as_str())
            .bind(id.external_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbTransaction::into_domain).transpose()
    }

    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool, RepoError> {
        let row: DbCount = sqlx::query_as(
            r#"SELECT COUNT(*) AS count FROM transactions WHERE account_id = ? AND external_id = ?"#,
        )
        .bind(id.account_id().as_str())
        .bind(id.external_id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(row.count > 0)
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE account_id = ? AND booking_date >= ? AND booking_date <= ? \
             ORDER BY booking_date ASC, external_id ASC"
        );
        let rows: Vec<DbTransaction> = sqlx::query_as(&sql)
            .bind(account_id.as_str())
            .bind(range.from().format(DATE_FORMAT).to_string())
            .bind(range.to().format(DATE_FORMAT).to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        rows.into_iter().map(DbTransaction::into_domain).collect()
    }

    async fn list_by_batch(&self, batch_id: &ImportBatchId) -> Result<Vec<Transaction>, RepoError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE account_id = ? AND batch_sequence = ? \
             ORDER BY booking_date ASC, external_id ASC"
        );
        let rows: Vec<DbTransaction> = sqlx::query_as(&sql)
            .bind(batch_id.account_id().as_str())
            .bind(sequence_param(batch_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        rows.into_iter().map(DbTransaction::into_domain).collect()
    }

    async fn count_transactions(&self) -> Result<u64, RepoError> {
        let row: DbCount = sqlx::query_as(r#"SELECT COUNT(*) AS count FROM transactions"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        u64::try_from(row.count).map_err(|e| RepoError::Database(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Processing state store
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ProcessingStateStore for SqliteRepo {
    async fn get_state(&self, id: &TransactionId) -> Result<Option<ProcessingState>, RepoError> {
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM processing_states WHERE account_id = ? AND external_id = ?"
        );
        let row: Option<DbProcessingState> = sqlx::query_as(&sql)
            .bind(id.account_id().as_str())
            .bind(id.external_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbProcessingState::into_domain).transpose()
    }

    async fn save_state(&self, state: &ProcessingState) -> Result<(), RepoError> {
        let record = state.record();

        let result = sqlx::query(
            r#"
            UPDATE processing_states
            SET status = ?, is_duplicate = ?,
                suggested_payee_name = ?, suggested_category = ?, suggested_memo = ?,
                category_confidence = ?, payee_confidence = ?,
                override_payee_name = ?, override_category = ?, override_memo = ?,
                destination_transaction_id = ?, destination_account_id = ?,
                processed_at = ?, submitted_at = ?
            WHERE account_id = ? AND external_id = ?
            "#,
        )
        .bind(record.status.as_ref())
        .bind(i64::from(record.is_duplicate))
        .bind(&record.suggested_payee_name)
        .bind(&record.suggested_category)
        .bind(&record.suggested_memo)
        .bind(record.category_confidence.map(|c| c.value()))
        .bind(record.payee_confidence.map(|c| c.value()))
        .bind(&record.override_payee_name)
        .bind(&record.override_category)
        .bind(&record.override_memo)
        .bind(&record.destination_transaction_id)
        .bind(&record.destination_account_id)
        .bind(record.processed_at.map(|t| t.to_rfc3339()))
        .bind(record.submitted_at.map(|t| t.to_rfc3339()))
        .bind(record.transaction_id.account_id().as_str())
        .bind(record.transaction_id.external_id())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        Ok(())
    }

    async fn list_states(
        &self,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<ProcessingState>, RepoError> {
        let status_str = status.map(|s| s.to_string());
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM processing_states \
             WHERE (? IS NULL OR status = ?) \
             ORDER BY account_id ASC, external_id ASC"
        );
        let rows: Vec<DbProcessingState> = sqlx::query_as(&sql)
            .bind(&status_str)
            .bind(&status_str)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        rows.into_iter().map(DbProcessingState::into_domain).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event outbox
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl EventOutbox for SqliteRepo {
    async fn append_events(&self, events: &[PipelineEvent]) -> Result<(), RepoError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        for event in events {
            let row =
                OutboxEvent::from_event(event).map_err(|e| RepoError::Database(e.to_string()))?;

            sqlx::query(
                r#"INSERT INTO event_outbox (id, event_type, payload, status, created_at) VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(row.id.to_string())
            .bind(&row.event_type)
            .bind(row.payload.to_string())
            .bind(row.status.as_ref())
            .bind(row.created_at.to_rfc3339())
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;
        }

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn pending_events(
        &self,
        limit: i64,
        retry_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, RepoError> {
        let rows = sqlx::query_as::<_, DbOutboxEvent>(
            r#"
            SELECT id, event_type, payload, status, created_at, processed_at, attempts, last_error
            FROM event_outbox
            WHERE status = 'PENDING'
               OR (status = 'FAILED' AND attempts < ? AND processed_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(OutboxEvent::MAX_ATTEMPTS)
        .bind(attempt_timestamp(retry_cutoff))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        rows.into_iter().map(|row| row.into_domain()).collect()
    }

    async fn mark_event(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        let now = attempt_timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = ?, processed_at = ?, last_error = ?, attempts = attempts + 1
            WHERE id = ?
            "#,
        )
        .bind(status.as_ref())
        .bind(now)
        .bind(last_error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        Ok(())
    }
}

/// Fixed-width UTC form, so attempt times compare correctly as text.
fn attempt_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
