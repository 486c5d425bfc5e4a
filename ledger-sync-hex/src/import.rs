//! Import service: raw bank-feed data in, transactions and initial processing
//! states out.
//!
//! Each raw transaction is handled on its own. A malformed item is skipped and
//! reported, an existing id is reported as a duplicate, and neither stops the
//! rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use ledger_sync_types::{
    AccountId, DateRange, EventKind, ImportBatchId, InsertOutcome, PipelineError, PipelineEvent,
    PipelineStore, ProcessingState, RawTransaction, RawTransactionSource, Transaction,
    TransactionId,
};
use tracing::{debug, info, instrument, warn};

use crate::DEFAULT_CONCURRENCY;
use crate::context::OperationContext;
use crate::locks::KeyedLocks;
use crate::retry::RetryPolicy;

/// A raw transaction that was not imported, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRaw {
    pub external_id: String,
    pub reason: String,
}

/// Result of one import run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub account_id: AccountId,
    pub batch_id: ImportBatchId,
    /// Newly created transactions, in input order
    pub imported: Vec<TransactionId>,
    /// External ids that already existed
    pub duplicate_ids: Vec<String>,
    /// Malformed input, skipped
    pub rejected: Vec<RejectedRaw>,
    /// Items not stored because of a store error, timeout or cancellation
    pub failed: Vec<RejectedRaw>,
}

impl ImportReport {
    pub fn imported_count(&self) -> usize {
        self.imported.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicate_ids.len()
    }

    /// True when every item reached a final answer (imported, duplicate or rejected).
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Summary event for subscribers. Pure data; nothing is published.
    pub fn completed_event(&self) -> PipelineEvent {
        PipelineEvent::new(EventKind::ImportCompleted {
            account_id: self.account_id.clone(),
            batch_id: self.batch_id.clone(),
            imported_count: self.imported_count(),
            duplicate_count: self.duplicate_count(),
            rejected_count: self.rejected.len() + self.failed.len(),
        })
    }
}

enum ItemOutcome {
    Imported(TransactionId),
    Duplicate(String),
    Rejected(RejectedRaw),
    Failed(RejectedRaw),
}

/// Application service for imports.
pub struct ImportService<R: PipelineStore> {
    repo: Arc<R>,
    locks: Arc<KeyedLocks>,
    concurrency: usize,
}

impl<R: PipelineStore> ImportService<R> {
    pub fn new(repo: Arc<R>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            repo,
            locks,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Maximum number of items processed at the same time (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Import
    // ─────────────────────────────────────────────────────────────────────────────

    /// Imports a batch of raw transactions for one account.
    ///
    /// Only allocating the batch id can fail the whole call; per-item problems
    /// end up in the report.
    #[instrument(skip(self, ctx, raws), fields(account = %account_id, count = raws.len()))]
    pub async fn import_transactions(
        &self,
        ctx: &OperationContext,
        account_id: &AccountId,
        raws: Vec<RawTransaction>,
    ) -> Result<ImportReport, PipelineError> {
        let batch_id = ctx.run(self.repo.next_import_batch(account_id)).await??;
        let now = Utc::now();
        let today = now.date_naive();

        let outcomes: Vec<ItemOutcome> = stream::iter(raws)
            .map(|raw| self.import_one(ctx, &batch_id, raw, today, now))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ImportReport {
            account_id: account_id.clone(),
            batch_id,
            imported: Vec::new(),
            duplicate_ids: Vec::new(),
            rejected: Vec::new(),
            failed: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Imported(id) => report.imported.push(id),
                ItemOutcome::Duplicate(external_id) => report.duplicate_ids.push(external_id),
                ItemOutcome::Rejected(item) => report.rejected.push(item),
                ItemOutcome::Failed(item) => report.failed.push(item),
            }
        }

        info!(
            batch = %report.batch_id,
            imported = report.imported_count(),
            duplicates = report.duplicate_count(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Import finished"
        );
        Ok(report)
    }

    /// Fetches from a bank feed, retrying transient failures, then imports.
    #[instrument(skip(self, ctx, source, retry), fields(account = %account_id))]
    pub async fn import_from_source<S>(
        &self,
        ctx: &OperationContext,
        source: &S,
        account_id: &AccountId,
        range: DateRange,
        retry: &RetryPolicy,
    ) -> Result<ImportReport, PipelineError>
    where
        S: RawTransactionSource + ?Sized,
    {
        let raws = ctx
            .run(retry.run(|| source.fetch(account_id, range)))
            .await?
            .map_err(|e| PipelineError::External(e.to_string()))?;
        debug!(fetched = raws.len(), "Fetched raw transactions");

        self.import_transactions(ctx, account_id, raws).await
    }

    async fn import_one(
        &self,
        ctx: &OperationContext,
        batch_id: &ImportBatchId,
        raw: RawTransaction,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> ItemOutcome {
        let external_id = raw.external_id.clone();

        let id = match TransactionId::new(batch_id.account_id().clone(), &raw.external_id) {
            Ok(id) => id,
            Err(e) => return reject(&external_id, e),
        };

        match ctx.run(self.repo.transaction_exists(&id)).await {
            Ok(Ok(true)) => return ItemOutcome::Duplicate(external_id),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => return fail(&external_id, e),
            Err(e) => return fail(&external_id, e),
        }

        let tx = match Transaction::from_raw(batch_id, raw, today, now) {
            Ok(tx) => tx,
            Err(e) => return reject(&external_id, e),
        };
        let state = ProcessingState::new(tx.id.clone(), now);

        match ctx.run(self.repo.insert_imported(&tx, &state)).await {
            Ok(Ok(InsertOutcome::Inserted)) => ItemOutcome::Imported(id),
            Ok(Ok(InsertOutcome::AlreadyExists)) => ItemOutcome::Duplicate(external_id),
            Ok(Err(e)) => {
                warn!(transaction = %id, error = %e, "Failed to store transaction");
                fail(&external_id, e)
            }
            Err(e) => fail(&external_id, e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Duplicate flag
    // ─────────────────────────────────────────────────────────────────────────────

    /// Marks (or clears) a transaction as a duplicate of another one.
    ///
    /// A flagged transaction is never submitted.
    #[instrument(skip(self, ctx), fields(transaction = %id))]
    pub async fn flag_duplicate(
        &self,
        ctx: &OperationContext,
        id: &TransactionId,
        is_duplicate: bool,
    ) -> Result<ProcessingState, PipelineError> {
        let _guard = ctx.run(self.locks.lock(id)).await?;

        let mut state = ctx
            .run(self.repo.get_state(id))
            .await??
            .ok_or_else(|| PipelineError::NotFound(format!("Transaction {}", id)))?;
        state.set_duplicate(is_duplicate)?;
        ctx.run(self.repo.save_state(&state)).await??;

        Ok(state)
    }
}

fn fail(external_id: &str, err: impl std::fmt::Display) -> ItemOutcome {
    ItemOutcome::Failed(RejectedRaw {
        external_id: external_id.to_string(),
        reason: err.to_string(),
    })
}

fn reject(external_id: &str, err: impl std::fmt::Display) -> ItemOutcome {
    debug!(external_id, reason = %err, "Rejected raw transaction");
    ItemOutcome::Rejected(RejectedRaw {
        external_id: external_id.to_string(),
        reason: err.to_string(),
    })
}
