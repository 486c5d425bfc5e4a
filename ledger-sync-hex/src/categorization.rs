//! Categorization service: automated suggestions and user overrides.
//!
//! Suggestions come from a pluggable [`CategorizationStrategy`]. A suggestion
//! only assigns a category when its confidence reaches the configured
//! threshold and the category exists at the destination; otherwise the
//! suggestion is recorded without a category and the transaction stays
//! `Imported`.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use ledger_sync_types::{
    CategorizationStrategy, Category, CategoryOverride, CategorySource, CategorySuggestion,
    ConfidenceScore, EventKind, PipelineError, PipelineEvent, PipelineStore, ProcessingState,
    ProcessingStatus, TransactionFilter, TransactionId,
};
use tracing::{debug, info, instrument, warn};

use crate::DEFAULT_CONCURRENCY;
use crate::context::OperationContext;
use crate::locks::KeyedLocks;

/// Default acceptance threshold for suggested categories.
pub const DEFAULT_MIN_CONFIDENCE: f64 = ConfidenceScore::MEDIUM;

/// Mean of the present confidence scores; `None` when there are none.
pub fn calculate_average_confidence(suggestions: &[CategorySuggestion]) -> Option<ConfidenceScore> {
    ConfidenceScore::average(suggestions.iter().filter_map(|s| s.confidence))
}

/// Looks a category up by id, or by name ignoring case. Returns its id.
fn resolve_category(categories: &[Category], wanted: &str) -> Option<String> {
    let wanted = wanted.trim();
    categories
        .iter()
        .find(|c| c.id == wanted)
        .or_else(|| {
            categories
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(wanted))
        })
        .map(|c| c.id.clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Why a transaction was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySubmitted,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CategorizationOutcome {
    /// The state now has an effective category.
    Categorized {
        category_id: String,
        confidence: Option<ConfidenceScore>,
    },
    /// Suggestion recorded without a category.
    Uncategorized { confidence: Option<ConfidenceScore> },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationItem {
    pub transaction_id: TransactionId,
    pub outcome: CategorizationOutcome,
}

/// Result of a categorization batch.
#[derive(Debug, Clone)]
pub struct CategorizationReport {
    /// One entry per requested id, in request order
    pub items: Vec<CategorizationItem>,
    pub categorized_count: usize,
    pub average_confidence: Option<ConfidenceScore>,
    /// Per-transaction events followed by the batch event
    pub events: Vec<PipelineEvent>,
}

impl CategorizationReport {
    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, CategorizationOutcome::Failed(_)))
            .count()
    }
}

/// A single override and the event describing it.
#[derive(Debug, Clone)]
pub struct CategoryUpdate {
    pub state: ProcessingState,
    pub event: PipelineEvent,
}

/// Result of a bulk override.
#[derive(Debug, Clone)]
pub struct BulkUpdateReport {
    pub updated: Vec<TransactionId>,
    pub failed: Vec<(TransactionId, String)>,
    pub event: PipelineEvent,
}

impl BulkUpdateReport {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }
}

/// What happened to one id in a categorization batch, plus the suggestion
/// that was applied (for averaging).
struct ItemResult {
    item: CategorizationItem,
    applied: Option<CategorySuggestion>,
    event: Option<PipelineEvent>,
}

impl ItemResult {
    fn failed(id: &TransactionId, reason: impl ToString) -> Self {
        Self {
            item: CategorizationItem {
                transaction_id: id.clone(),
                outcome: CategorizationOutcome::Failed(reason.to_string()),
            },
            applied: None,
            event: None,
        }
    }

    fn skipped(id: &TransactionId, reason: SkipReason) -> Self {
        Self {
            item: CategorizationItem {
                transaction_id: id.clone(),
                outcome: CategorizationOutcome::Skipped(reason),
            },
            applied: None,
            event: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Application service for categorization.
pub struct CategorizationService<R, S, C>
where
    R: PipelineStore,
    S: CategorizationStrategy,
    C: CategorySource,
{
    repo: Arc<R>,
    strategy: Arc<S>,
    categories: Arc<C>,
    locks: Arc<KeyedLocks>,
    min_confidence: ConfidenceScore,
    concurrency: usize,
}

impl<R, S, C> CategorizationService<R, S, C>
where
    R: PipelineStore,
    S: CategorizationStrategy,
    C: CategorySource,
{
    pub fn new(repo: Arc<R>, strategy: Arc<S>, categories: Arc<C>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            repo,
            strategy,
            categories,
            locks,
            min_confidence: ConfidenceScore::new(DEFAULT_MIN_CONFIDENCE),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = ConfidenceScore::new(min_confidence);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn list_categories(&self, ctx: &OperationContext) -> Result<Vec<Category>, PipelineError> {
        ctx.run(self.categories.list_categories())
            .await?
            .map_err(|e| PipelineError::External(e.to_string()))
    }

    /// Drops the category of a suggestion that is not confident enough or
    /// names a category the destination does not know.
    fn accept(&self, suggestion: CategorySuggestion, known: &[Category]) -> CategorySuggestion {
        let suggestion = suggestion.normalized();
        let Some(category) = suggestion.category_id.clone() else {
            return suggestion;
        };

        let confidence = suggestion.confidence.map_or(0.0, |c| c.value());
        if confidence < self.min_confidence.value() {
            debug!(%category, confidence, "Suggestion below confidence threshold");
            return suggestion.without_category();
        }

        match resolve_category(known, &category) {
            Some(id) => CategorySuggestion {
                category_id: Some(id),
                ..suggestion
            },
            None => {
                warn!(%category, "Suggested category is unknown");
                suggestion.without_category()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Automated categorization
    // ─────────────────────────────────────────────────────────────────────────────

    /// Runs the strategy over the given transactions.
    ///
    /// Fails as a whole only when the category list cannot be loaded.
    /// Submitted and duplicate-flagged transactions are skipped.
    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    pub async fn categorize_transactions(
        &self,
        ctx: &OperationContext,
        ids: &[TransactionId],
    ) -> Result<CategorizationReport, PipelineError> {
        let known = self.list_categories(ctx).await?;

        let results: Vec<ItemResult> = stream::iter(ids)
            .map(|id| self.categorize_one(ctx, id, &known))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut items = Vec::with_capacity(results.len());
        let mut applied = Vec::new();
        let mut events = Vec::new();
        for result in results {
            items.push(result.item);
            applied.extend(result.applied);
            events.extend(result.event);
        }

        let categorized_count = items
            .iter()
            .filter(|i| matches!(i.outcome, CategorizationOutcome::Categorized { .. }))
            .count();
        let average_confidence = calculate_average_confidence(&applied);
        events.push(PipelineEvent::new(EventKind::CategorizationCompleted {
            categorized_count,
            average_confidence,
        }));

        let report = CategorizationReport {
            items,
            categorized_count,
            average_confidence,
            events,
        };
        info!(
            categorized = report.categorized_count,
            failed = report.failed_count(),
            "Categorization finished"
        );
        Ok(report)
    }

    /// Categorizes every transaction that is still `Imported`.
    pub async fn categorize_pending(
        &self,
        ctx: &OperationContext,
    ) -> Result<CategorizationReport, PipelineError> {
        let pending: Vec<TransactionId> = ctx
            .run(self.repo.list_states(Some(ProcessingStatus::Imported)))
            .await??
            .into_iter()
            .filter(|s| !s.is_duplicate())
            .map(|s| s.transaction_id().clone())
            .collect();

        self.categorize_transactions(ctx, &pending).await
    }

    async fn categorize_one(
        &self,
        ctx: &OperationContext,
        id: &TransactionId,
        known: &[Category],
    ) -> ItemResult {
        let _guard = match ctx.run(self.locks.lock(id)).await {
            Ok(guard) => guard,
            Err(e) => return ItemResult::failed(id, e),
        };

        let mut state = match ctx.run(self.repo.get_state(id)).await {
            Ok(Ok(Some(state))) => state,
            Ok(Ok(None)) => return ItemResult::failed(id, "Transaction not found"),
            Ok(Err(e)) => return ItemResult::failed(id, e),
            Err(e) => return ItemResult::failed(id, e),
        };
        if state.is_submitted() {
            return ItemResult::skipped(id, SkipReason::AlreadySubmitted);
        }
        if state.is_duplicate() {
            return ItemResult::skipped(id, SkipReason::Duplicate);
        }

        let tx = match ctx.run(self.repo.get_transaction(id)).await {
            Ok(Ok(Some(tx))) => tx,
            Ok(Ok(None)) => return ItemResult::failed(id, "Transaction not found"),
            Ok(Err(e)) => return ItemResult::failed(id, e),
            Err(e) => return ItemResult::failed(id, e),
        };

        let suggestion = match ctx.run(self.strategy.categorize(&tx)).await {
            Ok(Ok(suggestion)) => self.accept(suggestion, known),
            Ok(Err(e)) => {
                warn!(transaction = %id, error = %e, "Categorization strategy failed");
                return ItemResult::failed(id, e);
            }
            Err(e) => return ItemResult::failed(id, e),
        };

        // An inconclusive suggestion does not touch an already categorized state.
        let ignored = !suggestion.has_category() && state.status() == ProcessingStatus::Categorized;
        if let Err(e) = state.apply_suggestion(suggestion.clone(), Utc::now()) {
            return ItemResult::failed(id, e);
        }
        match ctx.run(self.repo.save_state(&state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return ItemResult::failed(id, e),
            Err(e) => return ItemResult::failed(id, e),
        }

        let outcome = match state.effective_category() {
            Some(category_id) if !ignored && state.status() == ProcessingStatus::Categorized => {
                CategorizationOutcome::Categorized {
                    category_id: category_id.to_string(),
                    confidence: suggestion.confidence,
                }
            }
            _ => CategorizationOutcome::Uncategorized {
                confidence: suggestion.confidence,
            },
        };
        let category_id = match &outcome {
            CategorizationOutcome::Categorized { category_id, .. } => Some(category_id.clone()),
            _ => None,
        };
        let event = PipelineEvent::new(EventKind::TransactionCategorized {
            transaction_id: id.clone(),
            category_id,
            confidence: suggestion.confidence,
            status: state.status(),
        });
        debug!(transaction = %id, status = %state.status(), "Suggestion applied");

        ItemResult {
            item: CategorizationItem {
                transaction_id: id.clone(),
                outcome,
            },
            applied: (!ignored).then_some(suggestion),
            event: Some(event),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Overrides
    // ─────────────────────────────────────────────────────────────────────────────

    /// Applies a user override to one transaction.
    ///
    /// A category in the override must exist at the destination. Supplying a
    /// category moves an `Imported` transaction to `Categorized`.
    #[instrument(skip(self, ctx, change), fields(transaction = %id))]
    pub async fn update_category(
        &self,
        ctx: &OperationContext,
        id: &TransactionId,
        change: CategoryOverride,
    ) -> Result<CategoryUpdate, PipelineError> {
        let change = self.validate_override(ctx, change).await?;

        let _guard = ctx.run(self.locks.lock(id)).await?;
        let mut state = ctx
            .run(self.repo.get_state(id))
            .await??
            .ok_or_else(|| PipelineError::NotFound(format!("Transaction {}", id)))?;
        state.apply_override(change)?;
        ctx.run(self.repo.save_state(&state)).await??;

        let event = PipelineEvent::new(EventKind::CategoryOverridden {
            transaction_id: id.clone(),
            category_id: state.effective_category().map(str::to_string),
            status: state.status(),
        });
        info!(status = %state.status(), "Category overridden");
        Ok(CategoryUpdate { state, event })
    }

    /// Applies the same override to every non-submitted transaction matching
    /// `filter`. The override must carry a category.
    #[instrument(skip(self, ctx, filter, change))]
    pub async fn bulk_update_category(
        &self,
        ctx: &OperationContext,
        filter: &TransactionFilter,
        change: CategoryOverride,
    ) -> Result<BulkUpdateReport, PipelineError> {
        let change = change.normalized();
        if change.category_id.is_none() {
            return Err(PipelineError::BadRequest(
                "Bulk update requires a category".into(),
            ));
        }
        let change = self.validate_override(ctx, change).await?;
        let category_id = change.category_id.clone().unwrap_or_default();

        let mut candidates = Vec::new();
        let states = ctx.run(self.repo.list_states(filter.status)).await??;
        for state in states.into_iter().filter(|s| !s.is_submitted()) {
            let id = state.transaction_id().clone();
            if let Some(tx) = ctx.run(self.repo.get_transaction(&id)).await?? {
                if filter.matches(&tx, &state) {
                    candidates.push(id);
                }
            }
        }

        let results: Vec<(TransactionId, Result<(), PipelineError>)> = stream::iter(candidates)
            .map(|id| {
                let change = change.clone();
                async move {
                    let result = self.override_one(ctx, &id, change).await;
                    (id, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => updated.push(id),
                Err(e) => failed.push((id, e.to_string())),
            }
        }

        let event = PipelineEvent::new(EventKind::CategoryBulkUpdated {
            updated_count: updated.len(),
            category_id,
        });
        info!(updated = updated.len(), failed = failed.len(), "Bulk update finished");
        Ok(BulkUpdateReport {
            updated,
            failed,
            event,
        })
    }

    async fn override_one(
        &self,
        ctx: &OperationContext,
        id: &TransactionId,
        change: CategoryOverride,
    ) -> Result<(), PipelineError> {
        let _guard = ctx.run(self.locks.lock(id)).await?;
        let mut state = ctx
            .run(self.repo.get_state(id))
            .await??
            .ok_or_else(|| PipelineError::NotFound(format!("Transaction {}", id)))?;
        state.apply_override(change)?;
        ctx.run(self.repo.save_state(&state)).await??;
        Ok(())
    }

    /// Normalizes an override and maps its category onto a known category id.
    async fn validate_override(
        &self,
        ctx: &OperationContext,
        change: CategoryOverride,
    ) -> Result<CategoryOverride, PipelineError> {
        let change = change.normalized();
        if change.is_empty() {
            return Err(PipelineError::BadRequest(
                "Override must set a category, payee or memo".into(),
            ));
        }

        let Some(wanted) = change.category_id.as_deref() else {
            return Ok(change);
        };
        let known = self.list_categories(ctx).await?;
        let category_id = resolve_category(&known, wanted)
            .ok_or_else(|| PipelineError::UnknownCategory(wanted.to_string()))?;

        Ok(CategoryOverride {
            category_id: Some(category_id),
            ..change
        })
    }
}
