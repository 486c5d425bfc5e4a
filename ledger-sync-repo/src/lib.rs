//! # Ledger Sync Repository
//!
//! Concrete store adapters for the ledger sync pipeline. Every adapter
//! implements the `TransactionStore`, `ProcessingStateStore` and
//! `EventOutbox` ports; the outbox relay lives here too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_sync_types::{
    AccountId, DateRange, DeliveryStatus, EventOutbox, ImportBatchId, InsertOutcome, OutboxEvent,
    PipelineEvent, ProcessingState, ProcessingStateStore, ProcessingStatus, RepoError,
    Transaction, TransactionId, TransactionStore,
};
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
mod types;

pub mod relay;
pub mod security;


pub use memory::MemoryRepo;
pub use relay::{EventRelay, RelayReport};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepo;

/// URL prefix selecting the in-memory adapter.
pub const MEMORY_URL: &str = "memory://";

/// Unified repository wrapper over the available adapters.
pub enum Repo {
    Memory(MemoryRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteRepo),
}

/// Build and initialize a repository from a database URL.
///
/// This function:
/// 1. Picks the adapter from the URL scheme
/// 2. Connects and runs migrations (SQLite)
/// 3. Returns a ready-to-use `Repo`
///
/// # Examples
///
/// ```ignore
/// // In-memory, nothing persisted
/// let repo = build_repo("memory://").await?;
///
/// // SQLite (with `sqlite` feature)
/// let repo = build_repo("sqlite://ledger-sync.db?mode=rwc").await?;
/// ```
pub async fn build_repo(database_url: &str) -> anyhow::Result<Repo> {
    Repo::new(database_url).await
}

impl Repo {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        if database_url.starts_with(MEMORY_URL) {
            return Ok(Self::Memory(MemoryRepo::new()));
        }

        if database_url.starts_with("sqlite:") {
            return Self::connect_sqlite(database_url).await;
        }

        anyhow::bail!("Unsupported database URL: {}", database_url)
    }

    #[cfg(feature = "sqlite")]
    async fn connect_sqlite(database_url: &str) -> anyhow::Result<Self> {
        let inner = SqliteRepo::new(database_url).await?;
        Ok(Self::Sqlite(inner))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn connect_sqlite(_database_url: &str) -> anyhow::Result<Self> {
        anyhow::bail!("SQLite support requires the `sqlite` feature")
    }

    /// Short adapter name for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Port implementations for Repo (delegation)
// ─────────────────────────────────────────────────────────────────────────────

/// Every port an adapter implements, as one object type.
trait Store: TransactionStore + ProcessingStateStore + EventOutbox {}

impl<T: TransactionStore + ProcessingStateStore + EventOutbox> Store for T {}

impl Repo {
    fn store(&self) -> &dyn Store {
        match self {
            Self::Memory(repo) => repo,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(repo) => repo,
        }
    }
}

#[async_trait]
impl TransactionStore for Repo {
    async fn insert_imported(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
    ) -> Result<InsertOutcome, RepoError> {
        self.store().insert_imported(tx, state).await
    }

    async fn next_import_batch(&self, account_id: &AccountId) -> Result<ImportBatchId, RepoError> {
        self.store().next_import_batch(account_id).await
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError> {
        self.store().get_transaction(id).await
    }

    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool, RepoError> {
        self.store().transaction_exists(id).await
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<Transaction>, RepoError> {
        self.store().list_by_account(account_id, range).await
    }

    async fn list_by_batch(&self, batch_id: &ImportBatchId) -> Result<Vec<Transaction>, RepoError> {
        self.store().list_by_batch(batch_id).await
    }

    async fn count_transactions(&self) -> Result<u64, RepoError> {
        self.store().count_transactions().await
    }
}

#[async_trait]
impl ProcessingStateStore for Repo {
    async fn get_state(&self, id: &TransactionId) -> Result<Option<ProcessingState>, RepoError> {
        self.store().get_state(id).await
    }

    async fn save_state(&self, state: &ProcessingState) -> Result<(), RepoError> {
        self.store().save_state(state).await
    }

    async fn list_states(
        &self,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<ProcessingState>, RepoError> {
        self.store().list_states(status).await
    }
}

#[async_trait]
impl EventOutbox for Repo {
    async fn append_events(&self, events: &[PipelineEvent]) -> Result<(), RepoError> {
        self.store().append_events(events).await
    }

    async fn pending_events(
        &self,
        limit: i64,
        retry_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, RepoError> {
        self.store().pending_events(limit, retry_cutoff).await
    }

    async fn mark_event(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        self.store().mark_event(id, status, last_error).await
    }
}
