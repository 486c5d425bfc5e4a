//! In-memory repository adapter.
//!
//! Backed by sharded concurrent maps; used for tests, dry runs and the
//! `memory://` database URL.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use ledger_sync_types::{
    AccountId, DateRange, DeliveryStatus, EventOutbox, ImportBatchId, InsertOutcome, OutboxEvent,
    PipelineEvent, ProcessingState, ProcessingStateStore, ProcessingStatus, RepoError,
    Transaction, TransactionId, TransactionStore,
};

/// In-memory repository implementation.
#[derive(Default)]
pub struct MemoryRepo {
    transactions: DashMap<TransactionId, Transaction>,
    states: DashMap<TransactionId, ProcessingState>,
    batch_sequences: DashMap<AccountId, u64>,
    outbox: Mutex<Vec<OutboxEvent>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn outbox(&self) -> Result<std::sync::MutexGuard<'_, Vec<OutboxEvent>>, RepoError> {
        self.outbox
            .lock()
            .map_err(|e| RepoError::Database(format!("Outbox lock poisoned: {}", e)))
    }
}

fn sorted(mut txs: Vec<Transaction>) -> Vec<Transaction> {
    txs.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    txs
}

#[async_trait]
impl TransactionStore for MemoryRepo {
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

        // The vacant entry holds the shard lock, so the state is visible
        // before the transaction becomes readable.
        match self.transactions.entry(tx.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                self.states.insert(tx.id.clone(), state.clone());
                slot.insert(tx.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn next_import_batch(&self, account_id: &AccountId) -> Result<ImportBatchId, RepoError> {
        let mut sequence = self.batch_sequences.entry(account_id.clone()).or_insert(0);
        *sequence += 1;
        Ok(ImportBatchId::new(account_id.clone(), *sequence)?)
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError> {
        Ok(self.transactions.get(id).map(|t| t.value().clone()))
    }

    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool, RepoError> {
        Ok(self.transactions.contains_key(id))
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<Transaction>, RepoError> {
        let txs = self
            .transactions
            .iter()
            .filter(|t| t.id.account_id() == account_id && range.contains(t.date))
            .map(|t| t.value().clone())
            .collect();
        Ok(sorted(txs))
    }

    async fn list_by_batch(&self, batch_id: &ImportBatchId) -> Result<Vec<Transaction>, RepoError> {
        let txs = self
            .transactions
            .iter()
            .filter(|t| t.import_batch == *batch_id)
            .map(|t| t.value().clone())
            .collect();
        Ok(sorted(txs))
    }

    async fn count_transactions(&self) -> Result<u64, RepoError> {
        Ok(self.transactions.len() as u64)
    }
}

#[async_trait]
impl ProcessingStateStore for MemoryRepo {
    async fn get_state(&self, id: &TransactionId) -> Result<Option<ProcessingState>, RepoError> {
        Ok(self.states.get(id).map(|s| s.value().clone()))
    }

    async fn save_state(&self, state: &ProcessingState) -> Result<(), RepoError> {
        match self.states.get_mut(state.transaction_id()) {
            Some(mut slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }

    async fn list_states(
        &self,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<ProcessingState>, RepoError> {
        let mut states: Vec<ProcessingState> = self
            .states
            .iter()
            .filter(|s| status.is_none_or(|wanted| s.status() == wanted))
            .map(|s| s.value().clone())
            .collect();
        states.sort_by(|a, b| a.transaction_id().cmp(b.transaction_id()));
        Ok(states)
    }
}

#[async_trait]
impl EventOutbox for MemoryRepo {
    async fn append_events(&self, events: &[PipelineEvent]) -> Result<(), RepoError> {
        let rows = events
            .iter()
            .map(OutboxEvent::from_event)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RepoError::Database(e.to_string()))?;
        self.outbox()?.extend(rows);
        Ok(())
    }

    async fn pending_events(
        &self,
        limit: i64,
        retry_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, RepoError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .outbox()?
            .iter()
            .filter(|e| e.is_due(retry_cutoff))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_event(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        let mut outbox = self.outbox()?;
        let event = outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(RepoError::NotFound)?;
        event.status = status;
        event.last_error = last_error;
        event.processed_at = Some(Utc::now());
        event.attempts += 1;
        Ok(())
    }
}
