//! Repository ports.
//!
//! Transaction records and processing states are stored keyed by
//! [`TransactionId`]. Adapters (SQLite, in-memory) implement these traits.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AccountId, DeliveryStatus, ImportBatchId, OutboxEvent, PipelineEvent, ProcessingState,
    ProcessingStatus, Transaction, TransactionId,
};
use crate::dto::DateRange;
use crate::error::RepoError;

/// Result of an atomic import insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Transaction and its initial state were both written.
    Inserted,
    /// A transaction with the same id already exists; nothing was written.
    AlreadyExists,
}

/// Store of immutable transaction records.
#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Import (MUST be atomic)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Writes a transaction together with its initial processing state.
    ///
    /// Either both records are written or neither is. An existing id is
    /// reported as [`InsertOutcome::AlreadyExists`], not as an error.
    async fn insert_imported(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
    ) -> Result<InsertOutcome, RepoError>;

    /// Allocates the next import batch id for an account (sequence starts at 1).
    async fn next_import_batch(&self, account_id: &AccountId) -> Result<ImportBatchId, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────────

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError>;

    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool, RepoError>;

    /// Transactions of an account booked within `range`, oldest first.
    async fn list_by_account(
        &self,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<Transaction>, RepoError>;

    /// Transactions created by one import run.
    async fn list_by_batch(&self, batch_id: &ImportBatchId) -> Result<Vec<Transaction>, RepoError>;

    async fn count_transactions(&self) -> Result<u64, RepoError>;
}

/// Store of mutable processing states.
#[async_trait::async_trait]
pub trait ProcessingStateStore: Send + Sync + 'static {
    async fn get_state(&self, id: &TransactionId) -> Result<Option<ProcessingState>, RepoError>;

    /// Overwrites an existing state. Fails with `NotFound` if there is none.
    async fn save_state(&self, state: &ProcessingState) -> Result<(), RepoError>;

    /// States with the given status (all states for `None`).
    async fn list_states(
        &self,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<ProcessingState>, RepoError>;
}

/// Both stores behind one handle, as every service needs.
pub trait PipelineStore: TransactionStore + ProcessingStateStore {}

impl<T: TransactionStore + ProcessingStateStore> PipelineStore for T {}

/// Persisted queue of events awaiting delivery.
#[async_trait::async_trait]
pub trait EventOutbox: Send + Sync + 'static {
    async fn append_events(&self, events: &[PipelineEvent]) -> Result<(), RepoError>;

    /// Events due for delivery, oldest first (see [`OutboxEvent::is_due`]).
    ///
    /// Failed events come back until they reach [`OutboxEvent::MAX_ATTEMPTS`].
    async fn pending_events(
        &self,
        limit: i64,
        retry_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, RepoError>;

    /// Records a delivery attempt and bumps the attempt count.
    async fn mark_event(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError>;
}
