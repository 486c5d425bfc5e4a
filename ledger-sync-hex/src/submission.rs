//! Submission service: pushes categorized transactions to the destination
//! system and records the outcome per transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use ledger_sync_types::{
    AccountId, EventKind, Interrupted, PipelineError, PipelineEvent, PipelineStore,
    ProcessingStatus, SubmissionError, SubmissionPort, TransactionId, TransitionError,
};
use tracing::{error, info, instrument, warn};

use crate::DEFAULT_CONCURRENCY;
use crate::context::OperationContext;
use crate::locks::KeyedLocks;

/// Why a submission attempt did not go through.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmissionFailure {
    #[error(transparent)]
    Precondition(#[from] TransitionError),

    #[error(transparent)]
    Destination(#[from] SubmissionError),

    #[error("Transaction not found")]
    NotFound,

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Submitted { destination_transaction_id: String },
    Failed(SubmissionFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionItem {
    pub transaction_id: TransactionId,
    pub outcome: SubmissionOutcome,
}

impl SubmissionItem {
    pub fn is_submitted(&self) -> bool {
        matches!(self.outcome, SubmissionOutcome::Submitted { .. })
    }
}

/// One outcome per requested id, in request order.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub items: Vec<SubmissionItem>,
    /// Per-transaction events followed by the batch event
    pub events: Vec<PipelineEvent>,
}

impl SubmissionReport {
    pub fn submitted_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_submitted()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.submitted_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TransactionId, &SubmissionFailure)> {
        self.items.iter().filter_map(|i| match &i.outcome {
            SubmissionOutcome::Failed(reason) => Some((&i.transaction_id, reason)),
            SubmissionOutcome::Submitted { .. } => None,
        })
    }
}

/// Application service for submissions.
///
/// `targets` maps a source account to its destination account. A transaction
/// whose account has no mapping fails with `MissingDestinationAccount`.
pub struct SubmissionService<R: PipelineStore, P: SubmissionPort> {
    repo: Arc<R>,
    port: Arc<P>,
    locks: Arc<KeyedLocks>,
    targets: HashMap<AccountId, String>,
    concurrency: usize,
}

impl<R: PipelineStore, P: SubmissionPort> SubmissionService<R, P> {
    pub fn new(
        repo: Arc<R>,
        port: Arc<P>,
        locks: Arc<KeyedLocks>,
        targets: HashMap<AccountId, String>,
    ) -> Self {
        Self {
            repo,
            port,
            locks,
            targets,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn destination_for(&self, account_id: &AccountId) -> Option<&str> {
        self.targets.get(account_id).map(String::as_str)
    }

    /// Non-duplicate `Categorized` transactions, in store order.
    pub async fn ready(&self, ctx: &OperationContext) -> Result<Vec<TransactionId>, PipelineError> {
        let states = ctx
            .run(self.repo.list_states(Some(ProcessingStatus::Categorized)))
            .await??;
        Ok(states
            .into_iter()
            .filter(|s| !s.is_duplicate())
            .map(|s| s.transaction_id().clone())
            .collect())
    }

    /// Submits everything [`ready`](Self::ready) returns.
    pub async fn submit_ready(
        &self,
        ctx: &OperationContext,
    ) -> Result<SubmissionReport, PipelineError> {
        let ids = self.ready(ctx).await?;
        Ok(self.submit_transactions(ctx, &ids).await)
    }

    /// Submits each id once. Failures are reported per item and leave the
    /// processing state untouched.
    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    pub async fn submit_transactions(
        &self,
        ctx: &OperationContext,
        ids: &[TransactionId],
    ) -> SubmissionReport {
        let items: Vec<SubmissionItem> = stream::iter(ids)
            .map(|id| async move {
                SubmissionItem {
                    transaction_id: id.clone(),
                    outcome: self.submit_one(ctx, id).await,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut events: Vec<PipelineEvent> = items
            .iter()
            .filter_map(|item| match &item.outcome {
                SubmissionOutcome::Submitted {
                    destination_transaction_id,
                } => Some(PipelineEvent::new(EventKind::TransactionSubmitted {
                    transaction_id: item.transaction_id.clone(),
                    destination_transaction_id: destination_transaction_id.clone(),
                })),
                SubmissionOutcome::Failed(_) => None,
            })
            .collect();

        let mut report = SubmissionReport {
            items,
            events: Vec::new(),
        };
        events.push(PipelineEvent::new(EventKind::SubmissionCompleted {
            submitted_count: report.submitted_count(),
            failed_count: report.failed_count(),
        }));
        report.events = events;

        info!(
            submitted = report.submitted_count(),
            failed = report.failed_count(),
            "Submission finished"
        );
        report
    }

    async fn submit_one(&self, ctx: &OperationContext, id: &TransactionId) -> SubmissionOutcome {
        match self.try_submit(ctx, id).await {
            Ok(destination_transaction_id) => SubmissionOutcome::Submitted {
                destination_transaction_id,
            },
            Err(reason) => {
                warn!(transaction = %id, %reason, "Submission failed");
                SubmissionOutcome::Failed(reason)
            }
        }
    }

    async fn try_submit(
        &self,
        ctx: &OperationContext,
        id: &TransactionId,
    ) -> Result<String, SubmissionFailure> {
        let _guard = ctx.run(self.locks.lock(id)).await?;

        let mut state = ctx
            .run(self.repo.get_state(id))
            .await?
            .map_err(|e| SubmissionFailure::Store(e.to_string()))?
            .ok_or(SubmissionFailure::NotFound)?;
        let destination = self.destination_for(id.account_id());
        state.check_submittable(destination)?;
        let destination = destination.ok_or(TransitionError::MissingDestinationAccount)?;

        let tx = ctx
            .run(self.repo.get_transaction(id))
            .await?
            .map_err(|e| SubmissionFailure::Store(e.to_string()))?
            .ok_or(SubmissionFailure::NotFound)?;

        let receipt = ctx
            .run(self.port.submit(&tx, &state, destination))
            .await??;

        state.mark_submitted(destination, &receipt, Utc::now())?;
        // The destination already has it: record that even if cancelled meanwhile.
        let saved = match tokio::time::timeout(ctx.timeout(), self.repo.save_state(&state)).await {
            Ok(result) => result.map_err(|e| SubmissionFailure::Store(e.to_string())),
            Err(_) => Err(SubmissionFailure::Interrupted(Interrupted::TimedOut(
                ctx.timeout(),
            ))),
        };
        if let Err(e) = saved {
            error!(
                transaction = %id,
                destination_id = %receipt.destination_transaction_id,
                error = %e,
                "Accepted by destination but state was not saved"
            );
            return Err(e);
        }

        Ok(receipt.destination_transaction_id)
    }
}
