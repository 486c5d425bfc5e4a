//! The three services wired over one store and one lock map, plus the
//! read-only lookups used for reporting.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_sync_types::{
    AccountId, CategorizationStrategy, CategorySource, DateRange, ImportBatchId, PipelineError,
    PipelineStore, ProcessingState, ProcessingStatus, StatusCounts, SubmissionPort, Transaction,
};

use crate::DEFAULT_CONCURRENCY;
use crate::categorization::{CategorizationService, DEFAULT_MIN_CONFIDENCE};
use crate::context::OperationContext;
use crate::import::ImportService;
use crate::locks::KeyedLocks;
use crate::submission::SubmissionService;

/// Tunables shared by the services.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub min_confidence: f64,
    /// Source account to destination account
    pub targets: HashMap<AccountId, String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            targets: HashMap::new(),
        }
    }
}

pub struct Pipeline<R, S, C, P>
where
    R: PipelineStore,
    S: CategorizationStrategy,
    C: CategorySource,
    P: SubmissionPort,
{
    repo: Arc<R>,
    pub import: ImportService<R>,
    pub categorization: CategorizationService<R, S, C>,
    pub submission: SubmissionService<R, P>,
}

impl<R, S, C, P> Pipeline<R, S, C, P>
where
    R: PipelineStore,
    S: CategorizationStrategy,
    C: CategorySource,
    P: SubmissionPort,
{
    pub fn new(
        repo: Arc<R>,
        strategy: Arc<S>,
        categories: Arc<C>,
        submitter: Arc<P>,
        settings: PipelineSettings,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let import =
            ImportService::new(repo.clone(), locks.clone()).with_concurrency(settings.concurrency);
        let categorization =
            CategorizationService::new(repo.clone(), strategy, categories, locks.clone())
                .with_min_confidence(settings.min_confidence)
                .with_concurrency(settings.concurrency);
        let submission = SubmissionService::new(repo.clone(), submitter, locks, settings.targets)
            .with_concurrency(settings.concurrency);

        Self {
            repo,
            import,
            categorization,
            submission,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn list_by_account(
        &self,
        ctx: &OperationContext,
        account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<Transaction>, PipelineError> {
        Ok(ctx.run(self.repo.list_by_account(account_id, range)).await??)
    }

    pub async fn list_by_batch(
        &self,
        ctx: &OperationContext,
        batch_id: &ImportBatchId,
    ) -> Result<Vec<Transaction>, PipelineError> {
        Ok(ctx.run(self.repo.list_by_batch(batch_id)).await??)
    }

    pub async fn list_states(
        &self,
        ctx: &OperationContext,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<ProcessingState>, PipelineError> {
        Ok(ctx.run(self.repo.list_states(status)).await??)
    }

    pub async fn status_counts(&self, ctx: &OperationContext) -> Result<StatusCounts, PipelineError> {
        let mut counts = StatusCounts::default();
        for state in self.list_states(ctx, None).await? {
            counts.record(&state);
        }
        Ok(counts)
    }
}
