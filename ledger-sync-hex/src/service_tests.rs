//! Service-layer unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use ledger_sync_repo::MemoryRepo;
    use ledger_sync_types::{
        AccountId, CategorizationStrategy, Category, CategoryOverride, CategorySource,
        CategorySourceError, CategorySuggestion, ConfidenceScore, DateRange, EventKind,
        ImportBatchId, InsertOutcome, Interrupted, PipelineError, ProcessingState,
        ProcessingStateStore, ProcessingStatus, RawTransaction, RawTransactionSource, RepoError,
        SourceError, StrategyError, SubmissionError, SubmissionPort, SubmissionReceipt,
        Transaction, TransactionFilter, TransactionId, TransactionStore, TransitionError,
    };

    use crate::{
        CancelHandle, CategorizationOutcome, ImportService, KeyedLocks, OperationContext,
        Pipeline, PipelineSettings, RetryPolicy, SkipReason, SubmissionFailure,
        SubmissionOutcome,
    };

    // ─────────────────────────────────────────────────────────────────────────────
    // Mock ports
    // ─────────────────────────────────────────────────────────────────────────────

    /// Suggestions keyed by external id; anything else is inconclusive.
    pub struct MockStrategy {
        suggestions: Mutex<HashMap<String, CategorySuggestion>>,
        failing: Mutex<Vec<String>>,
        cancel_on: Mutex<Option<(String, CancelHandle)>>,
        gate: Mutex<Option<Gate>>,
    }

    /// Parks the strategy until the test lets it continue.
    #[derive(Clone)]
    pub struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                entered: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
            }
        }
    }

    impl MockStrategy {
        pub fn new() -> Self {
            Self {
                suggestions: Mutex::new(HashMap::new()),
                failing: Mutex::new(Vec::new()),
                cancel_on: Mutex::new(None),
                gate: Mutex::new(None),
            }
        }

        /// Cancels `handle` while categorizing `external_id`.
        pub fn cancel_while_categorizing(&self, external_id: &str, handle: CancelHandle) {
            *self.cancel_on.lock().unwrap() = Some((external_id.to_string(), handle));
        }

        pub fn hold(&self) -> Gate {
            let gate = Gate::new();
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn suggest(&self, external_id: &str, category: &str, payee: Option<&str>, confidence: f64) {
            self.suggestions.lock().unwrap().insert(
                external_id.to_string(),
                CategorySuggestion {
                    category_id: Some(category.to_string()),
                    payee_name: payee.map(str::to_string),
                    memo: None,
                    confidence: Some(ConfidenceScore::new(confidence)),
                    payee_confidence: payee.map(|_| ConfidenceScore::new(confidence)),
                },
            );
        }

        pub fn fail_for(&self, external_id: &str) {
            self.failing.lock().unwrap().push(external_id.to_string());
        }
    }

    #[async_trait]
    impl CategorizationStrategy for MockStrategy {
        async fn categorize(&self, tx: &Transaction) -> Result<CategorySuggestion, StrategyError> {
            let external_id = tx.id.external_id();
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if let Some((id, handle)) = self.cancel_on.lock().unwrap().as_ref() {
                if id == external_id {
                    handle.cancel();
                }
            }
            if self.failing.lock().unwrap().iter().any(|f| f == external_id) {
                return Err(StrategyError::Unavailable("model offline".into()));
            }
            Ok(self
                .suggestions
                .lock()
                .unwrap()
                .get(external_id)
                .cloned()
                .unwrap_or_else(CategorySuggestion::none))
        }
    }

    pub struct MockCategories {
        categories: Vec<Category>,
        available: Mutex<bool>,
    }

    impl MockCategories {
        pub fn new() -> Self {
            let category = |id: &str, name: &str| Category {
                id: id.to_string(),
                name: name.to_string(),
                parent_id: None,
            };
            Self {
                categories: vec![
                    category("groceries", "Groceries"),
                    category("dining", "Dining Out"),
                    category("rent", "Rent"),
                ],
                available: Mutex::new(true),
            }
        }

        pub fn go_offline(&self) {
            *self.available.lock().unwrap() = false;
        }
    }

    #[async_trait]
    impl CategorySource for MockCategories {
        async fn list_categories(&self) -> Result<Vec<Category>, CategorySourceError> {
            if !*self.available.lock().unwrap() {
                return Err(CategorySourceError::Unavailable("connection refused".into()));
            }
            Ok(self.categories.clone())
        }
    }

    /// Accepts everything except the ids it was told to reject.
    pub struct MockSubmitter {
        rejections: Mutex<HashMap<TransactionId, SubmissionError>>,
        calls: Mutex<Vec<(TransactionId, String)>>,
        cancel_on_submit: Mutex<Option<CancelHandle>>,
    }

    impl MockSubmitter {
        pub fn new() -> Self {
            Self {
                rejections: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                cancel_on_submit: Mutex::new(None),
            }
        }

        /// Cancels `handle` during the next accepted submission.
        pub fn cancel_while_submitting(&self, handle: CancelHandle) {
            *self.cancel_on_submit.lock().unwrap() = Some(handle);
        }

        pub fn reject(&self, id: &TransactionId, err: SubmissionError) {
            self.rejections.lock().unwrap().insert(id.clone(), err);
        }

        pub fn calls(&self) -> Vec<(TransactionId, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubmissionPort for MockSubmitter {
        async fn submit(
            &self,
            tx: &Transaction,
            _state: &ProcessingState,
            destination_account_id: &str,
        ) -> Result<SubmissionReceipt, SubmissionError> {
            self.calls
                .lock()
                .unwrap()
                .push((tx.id.clone(), destination_account_id.to_string()));
            if let Some(err) = self.rejections.lock().unwrap().get(&tx.id) {
                return Err(err.clone());
            }
            if let Some(handle) = self.cancel_on_submit.lock().unwrap().take() {
                handle.cancel();
            }
            Ok(SubmissionReceipt {
                destination_transaction_id: format!("dest-{}", tx.id.external_id()),
                status: "created".to_string(),
            })
        }
    }

    /// Returns queued responses in order, then empty lists.
    pub struct MockSource {
        responses: Mutex<Vec<Result<Vec<RawTransaction>, SourceError>>>,
        calls: Mutex<u32>,
    }

    impl MockSource {
        pub fn new(responses: Vec<Result<Vec<RawTransaction>, SourceError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RawTransactionSource for MockSource {
        async fn fetch(
            &self,
            _account_id: &AccountId,
            _range: DateRange,
        ) -> Result<Vec<RawTransaction>, SourceError> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Vec::new());
            }
            responses.remove(0)
        }
    }

    /// Memory store that cancels a context right after its first insert.
    pub struct CancellingStore {
        inner: MemoryRepo,
        handle: Mutex<Option<CancelHandle>>,
    }

    impl CancellingStore {
        pub fn new(handle: CancelHandle) -> Self {
            Self {
                inner: MemoryRepo::new(),
                handle: Mutex::new(Some(handle)),
            }
        }
    }

    #[async_trait]
    impl TransactionStore for CancellingStore {
        async fn insert_imported(
            &self,
            tx: &Transaction,
            state: &ProcessingState,
        ) -> Result<InsertOutcome, RepoError> {
            let outcome = self.inner.insert_imported(tx, state).await;
            if let Some(handle) = self.handle.lock().unwrap().take() {
                handle.cancel();
            }
            outcome
        }

        async fn next_import_batch(&self, account_id: &AccountId) -> Result<ImportBatchId, RepoError> {
            self.inner.next_import_batch(account_id).await
        }

        async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError> {
            self.inner.get_transaction(id).await
        }

        async fn transaction_exists(&self, id: &TransactionId) -> Result<bool, RepoError> {
            self.inner.transaction_exists(id).await
        }

        async fn list_by_account(
            &self,
            account_id: &AccountId,
            range: DateRange,
        ) -> Result<Vec<Transaction>, RepoError> {
            self.inner.list_by_account(account_id, range).await
        }

        async fn list_by_batch(&self, batch_id: &ImportBatchId) -> Result<Vec<Transaction>, RepoError> {
            self.inner.list_by_batch(batch_id).await
        }

        async fn count_transactions(&self) -> Result<u64, RepoError> {
            self.inner.count_transactions().await
        }
    }

    #[async_trait]
    impl ProcessingStateStore for CancellingStore {
        async fn get_state(&self, id: &TransactionId) -> Result<Option<ProcessingState>, RepoError> {
            self.inner.get_state(id).await
        }

        async fn save_state(&self, state: &ProcessingState) -> Result<(), RepoError> {
            self.inner.save_state(state).await
        }

        async fn list_states(
            &self,
            status: Option<ProcessingStatus>,
        ) -> Result<Vec<ProcessingState>, RepoError> {
            self.inner.list_states(status).await
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────────

    type TestPipeline = Pipeline<MemoryRepo, MockStrategy, MockCategories, MockSubmitter>;

    struct Harness {
        repo: Arc<MemoryRepo>,
        strategy: Arc<MockStrategy>,
        categories: Arc<MockCategories>,
        submitter: Arc<MockSubmitter>,
        pipeline: TestPipeline,
    }

    fn harness() -> Harness {
        harness_with_concurrency(4)
    }

    /// With a concurrency of 1 the items of a batch run strictly one after another.
    fn harness_with_concurrency(concurrency: usize) -> Harness {
        let repo = Arc::new(MemoryRepo::new());
        let strategy = Arc::new(MockStrategy::new());
        let categories = Arc::new(MockCategories::new());
        let submitter = Arc::new(MockSubmitter::new());
        let settings = PipelineSettings {
            concurrency,
            min_confidence: 0.5,
            targets: HashMap::from([(account(), "budget-main".to_string())]),
        };
        let pipeline = Pipeline::new(
            repo.clone(),
            strategy.clone(),
            categories.clone(),
            submitter.clone(),
            settings,
        );
        Harness {
            repo,
            strategy,
            categories,
            submitter,
            pipeline,
        }
    }

    fn ctx() -> OperationContext {
        OperationContext::with_timeout(Duration::from_secs(5))
    }

    fn account() -> AccountId {
        AccountId::new("checking").unwrap()
    }

    fn tx_id(external_id: &str) -> TransactionId {
        TransactionId::new(account(), external_id).unwrap()
    }

    fn raw(external_id: &str, message: &str, counterparty: Option<&str>) -> RawTransaction {
        RawTransaction {
            external_id: external_id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            amount: -1_250,
            currency: "EUR".to_string(),
            counterparty_name: counterparty.map(str::to_string),
            message: Some(message.to_string()),
            ..RawTransaction::default()
        }
    }

    async fn state(h: &Harness, external_id: &str) -> ProcessingState {
        h.repo.get_state(&tx_id(external_id)).await.unwrap().unwrap()
    }

    /// Imports the given ids and gives each a category and payee by override.
    async fn import_categorized(h: &Harness, external_ids: &[&str]) {
        let raws = external_ids
            .iter()
            .map(|id| raw(id, "Card payment", Some("Corner Shop")))
            .collect();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), raws)
            .await
            .unwrap();
        for id in external_ids {
            h.pipeline
                .categorization
                .update_category(
                    &ctx(),
                    &tx_id(id),
                    CategoryOverride::category("groceries").with_payee("Corner Shop"),
                )
                .await
                .unwrap();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Import
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_import_creates_transactions_and_states() {
        let h = harness();
        let report = h
            .pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![raw("T-1", "Rent March", None), raw("T-2", "Groceries", Some("Lidl"))],
            )
            .await
            .unwrap();

        assert_eq!(report.imported_count(), 2);
        assert_eq!(report.duplicate_count(), 0);
        assert!(report.is_complete());
        assert_eq!(report.batch_id.sequence(), 1);

        let state = state(&h, "T-1").await;
        assert_eq!(state.status(), ProcessingStatus::Imported);
        assert!(!state.is_duplicate());
        assert!(state.effective_category().is_none());
        assert_eq!(h.repo.count_transactions().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reimport_reports_duplicates() {
        let h = harness();
        let raws = vec![raw("T-1", "Rent", None), raw("T-2", "Coffee", None)];
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), raws.clone())
            .await
            .unwrap();

        let report = h
            .pipeline
            .import
            .import_transactions(&ctx(), &account(), raws)
            .await
            .unwrap();

        assert_eq!(report.imported_count(), 0);
        assert_eq!(report.duplicate_ids, vec!["T-1".to_string(), "T-2".to_string()]);
        assert_eq!(report.batch_id.sequence(), 2);
        assert_eq!(h.repo.count_transactions().await.unwrap(), 2);

        match report.completed_event().kind {
            EventKind::ImportCompleted {
                imported_count,
                duplicate_count,
                ..
            } => {
                assert_eq!(imported_count, 0);
                assert_eq!(duplicate_count, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_items_are_skipped() {
        let h = harness();
        let mut no_date = raw("T-2", "No date", None);
        no_date.date = None;
        let mut future = raw("T-3", "Future", None);
        future.date = NaiveDate::from_ymd_opt(2999, 1, 1);
        let mut blank = raw("T-4", "  ", None);
        blank.message = Some("   ".to_string());

        let report = h
            .pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![raw("T-1", "Fine", None), no_date, future, blank, raw("", "No id", None)],
            )
            .await
            .unwrap();

        assert_eq!(report.imported, vec![tx_id("T-1")]);
        let rejected: Vec<&str> = report
            .rejected
            .iter()
            .map(|r| r.external_id.as_str())
            .collect();
        assert_eq!(rejected, vec!["T-2", "T-3", "T-4", ""]);
        assert!(report.is_complete());
        assert!(!h.repo.transaction_exists(&tx_id("T-2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_import_does_nothing() {
        let h = harness();
        let (ctx, handle) = OperationContext::new(Duration::from_secs(5));
        handle.cancel();

        let result = h
            .pipeline
            .import
            .import_transactions(&ctx, &account(), vec![raw("T-1", "Rent", None)])
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::Interrupted(Interrupted::Cancelled))
        ));
        assert_eq!(h.repo.count_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_import_keeps_committed_items() {
        let (ctx, handle) = OperationContext::new(Duration::from_secs(5));
        let store = Arc::new(CancellingStore::new(handle));
        let service = ImportService::new(store.clone(), Arc::new(KeyedLocks::new()))
            .with_concurrency(1);

        let report = service
            .import_transactions(
                &ctx,
                &account(),
                vec![
                    raw("T-1", "Rent", None),
                    raw("T-2", "Coffee", None),
                    raw("T-3", "Fuel", None),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.imported, vec![tx_id("T-1")]);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.external_id.as_str()).collect();
        assert_eq!(failed, vec!["T-2", "T-3"]);
        assert!(report.failed.iter().all(|f| f.reason == Interrupted::Cancelled.to_string()));
        assert!(!report.is_complete());

        assert_eq!(store.count_transactions().await.unwrap(), 1);
        let kept = store.get_state(&tx_id("T-1")).await.unwrap().unwrap();
        assert_eq!(kept.status(), ProcessingStatus::Imported);
        assert!(store.get_state(&tx_id("T-2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_from_source_retries_transient_errors() {
        let h = harness();
        let source = MockSource::new(vec![
            Err(SourceError::Connection("reset by peer".into())),
            Ok(vec![raw("T-1", "Salary", Some("ACME"))]),
        ]);
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        };
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();

        let report = h
            .pipeline
            .import
            .import_from_source(&ctx(), &source, &account(), range, &retry)
            .await
            .unwrap();

        assert_eq!(report.imported_count(), 1);
        assert_eq!(*source.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_import_from_source_surfaces_permanent_errors() {
        let h = harness();
        let source = MockSource::new(vec![Err(SourceError::Auth("expired token".into()))]);
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();

        let result = h
            .pipeline
            .import
            .import_from_source(&ctx(), &source, &account(), range, &RetryPolicy::default())
            .await;

        assert!(matches!(result, Err(PipelineError::External(_))));
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Categorization
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_categorize_assigns_confident_known_category() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Grocery run", Some("Lidl"))])
            .await
            .unwrap();
        h.strategy.suggest("T-1", "groceries", Some("Lidl"), 0.92);

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1")])
            .await
            .unwrap();

        assert_eq!(report.categorized_count, 1);
        assert!(matches!(
            &report.items[0].outcome,
            CategorizationOutcome::Categorized { category_id, confidence: Some(_) } if category_id == "groceries"
        ));

        let state = state(&h, "T-1").await;
        assert_eq!(state.status(), ProcessingStatus::Categorized);
        assert_eq!(state.effective_category(), Some("groceries"));
        assert_eq!(state.effective_payee_name(), Some("Lidl"));
        assert!(state.processed_at().is_some());

        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[0].event_type(), "transaction.categorized");
        assert!(matches!(
            report.events[1].kind,
            EventKind::CategorizationCompleted {
                categorized_count: 1,
                average_confidence: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_categorize_resolves_category_by_name() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Pizza", None)])
            .await
            .unwrap();
        h.strategy.suggest("T-1", "dining out", None, 0.8);

        h.pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1")])
            .await
            .unwrap();

        assert_eq!(state(&h, "T-1").await.effective_category(), Some("dining"));
    }

    #[tokio::test]
    async fn test_low_confidence_or_unknown_category_stays_imported() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![raw("T-1", "Maybe food", None), raw("T-2", "Fuel", None)],
            )
            .await
            .unwrap();
        h.strategy.suggest("T-1", "groceries", None, 0.3);
        h.strategy.suggest("T-2", "fuel", None, 0.95);

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1"), tx_id("T-2")])
            .await
            .unwrap();

        assert_eq!(report.categorized_count, 0);
        for item in &report.items {
            assert!(matches!(item.outcome, CategorizationOutcome::Uncategorized { .. }));
        }

        let low = state(&h, "T-1").await;
        assert_eq!(low.status(), ProcessingStatus::Imported);
        assert!(low.suggested_category().is_none());
        assert_eq!(low.category_confidence(), Some(ConfidenceScore::new(0.3)));
        assert_eq!(state(&h, "T-2").await.status(), ProcessingStatus::Imported);

        // The scores still count towards the batch average.
        let avg = report.average_confidence.unwrap();
        assert!((avg.value() - 0.625).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_categorize_average_confidence() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![raw("T-1", "Groceries", None), raw("T-2", "Rent", None)],
            )
            .await
            .unwrap();
        h.strategy.suggest("T-1", "groceries", None, 0.7);
        h.strategy.suggest("T-2", "rent", None, 0.9);

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1"), tx_id("T-2")])
            .await
            .unwrap();

        assert_eq!(report.categorized_count, 2);
        let avg = report.average_confidence.unwrap();
        assert!((avg.value() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_categorize_skips_duplicates_submitted_and_reports_failures() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        h.pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;
        h.pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![raw("T-2", "Dup", None), raw("T-3", "Broken", None)],
            )
            .await
            .unwrap();
        h.pipeline
            .import
            .flag_duplicate(&ctx(), &tx_id("T-2"), true)
            .await
            .unwrap();
        h.strategy.fail_for("T-3");

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(
                &ctx(),
                &[tx_id("T-1"), tx_id("T-2"), tx_id("T-3"), tx_id("T-404")],
            )
            .await
            .unwrap();

        let outcomes: Vec<&CategorizationOutcome> =
            report.items.iter().map(|i| &i.outcome).collect();
        assert_eq!(
            outcomes[0],
            &CategorizationOutcome::Skipped(SkipReason::AlreadySubmitted)
        );
        assert_eq!(outcomes[1], &CategorizationOutcome::Skipped(SkipReason::Duplicate));
        assert!(matches!(outcomes[2], CategorizationOutcome::Failed(_)));
        assert!(matches!(outcomes[3], CategorizationOutcome::Failed(_)));
        assert_eq!(report.failed_count(), 2);
        assert!(report.average_confidence.is_none());
        assert_eq!(state(&h, "T-3").await.status(), ProcessingStatus::Imported);
    }

    #[tokio::test]
    async fn test_inconclusive_suggestion_on_categorized_is_not_counted() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        h.strategy.suggest("T-1", "rent", None, 0.2);

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1")])
            .await
            .unwrap();

        assert_eq!(report.categorized_count, 0);
        assert_eq!(
            report.items[0].outcome,
            CategorizationOutcome::Uncategorized {
                confidence: Some(ConfidenceScore::new(0.2))
            }
        );
        assert!(report.average_confidence.is_none());

        let state = state(&h, "T-1").await;
        assert_eq!(state.status(), ProcessingStatus::Categorized);
        assert_eq!(state.effective_category(), Some("groceries"));
        assert!(state.category_confidence().is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_categorization_keeps_committed_items() {
        let h = harness_with_concurrency(1);
        h.pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![
                    raw("T-1", "Groceries", None),
                    raw("T-2", "Groceries", None),
                    raw("T-3", "Groceries", None),
                ],
            )
            .await
            .unwrap();
        for id in ["T-1", "T-2", "T-3"] {
            h.strategy.suggest(id, "groceries", None, 0.9);
        }
        let (ctx, handle) = OperationContext::new(Duration::from_secs(5));
        h.strategy.cancel_while_categorizing("T-2", handle);

        let report = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx, &[tx_id("T-1"), tx_id("T-2"), tx_id("T-3")])
            .await
            .unwrap();

        assert_eq!(report.categorized_count, 1);
        assert!(matches!(
            report.items[0].outcome,
            CategorizationOutcome::Categorized { .. }
        ));
        let cancelled = CategorizationOutcome::Failed(Interrupted::Cancelled.to_string());
        assert_eq!(report.items[1].outcome, cancelled);
        assert_eq!(report.items[2].outcome, cancelled);

        assert_eq!(state(&h, "T-1").await.status(), ProcessingStatus::Categorized);
        assert_eq!(state(&h, "T-2").await.status(), ProcessingStatus::Imported);
        assert_eq!(state(&h, "T-3").await.status(), ProcessingStatus::Imported);
    }

    #[tokio::test]
    async fn test_override_waits_for_running_categorization() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Pizza", None)])
            .await
            .unwrap();
        h.strategy.suggest("T-1", "dining", Some("Pizzeria"), 0.9);
        let gate = h.strategy.hold();
        let ctx = ctx();
        let ids = [tx_id("T-1")];

        let categorize = h.pipeline.categorization.categorize_transactions(&ctx, &ids);
        let overridden = async {
            // The strategy is running and holds the transaction.
            gate.entered.notified().await;
            let mut update = Box::pin(h.pipeline.categorization.update_category(
                &ctx,
                &ids[0],
                CategoryOverride::category("groceries").with_payee("Corner Shop"),
            ));
            assert!(futures::poll!(&mut update).is_pending());
            gate.release.notify_one();
            update.await
        };

        let (report, update) = tokio::join!(categorize, overridden);
        let report = report.unwrap();
        let update = update.unwrap();

        assert!(matches!(
            &report.items[0].outcome,
            CategorizationOutcome::Categorized { category_id, .. } if category_id == "dining"
        ));
        assert_eq!(update.state.suggested_category(), Some("dining"));
        assert_eq!(update.state.effective_category(), Some("groceries"));

        let state = state(&h, "T-1").await;
        assert_eq!(state, update.state);
        assert_eq!(state.status(), ProcessingStatus::Categorized);
        assert_eq!(state.effective_category(), Some("groceries"));
        assert_eq!(state.effective_payee_name(), Some("Corner Shop"));
        assert_eq!(state.suggested_payee_name(), Some("Pizzeria"));
    }

    #[tokio::test]
    async fn test_categorize_fails_when_categories_unavailable() {
        let h = harness();
        h.categories.go_offline();

        let result = h
            .pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1")])
            .await;

        assert!(matches!(result, Err(PipelineError::External(_))));
    }

    #[tokio::test]
    async fn test_categorize_pending_picks_imported_only() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-2", "Groceries", None)])
            .await
            .unwrap();
        h.strategy.suggest("T-2", "groceries", None, 0.9);

        let report = h
            .pipeline
            .categorization
            .categorize_pending(&ctx())
            .await
            .unwrap();

        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].transaction_id, tx_id("T-2"));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Overrides
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_override_on_imported_advances_status() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Dinner", None)])
            .await
            .unwrap();

        let update = h
            .pipeline
            .categorization
            .update_category(
                &ctx(),
                &tx_id("T-1"),
                CategoryOverride::category("dining").with_memo("team dinner"),
            )
            .await
            .unwrap();

        assert_eq!(update.state.status(), ProcessingStatus::Categorized);
        assert_eq!(update.state.effective_category(), Some("dining"));
        assert_eq!(update.state.effective_memo(), Some("team dinner"));
        assert!(matches!(
            update.event.kind,
            EventKind::CategoryOverridden {
                status: ProcessingStatus::Categorized,
                ..
            }
        ));
        assert_eq!(state(&h, "T-1").await, update.state);
    }

    #[tokio::test]
    async fn test_override_wins_over_later_suggestion() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        h.strategy.suggest("T-1", "dining", Some("Pizzeria"), 0.99);

        h.pipeline
            .categorization
            .categorize_transactions(&ctx(), &[tx_id("T-1")])
            .await
            .unwrap();

        let state = state(&h, "T-1").await;
        assert_eq!(state.suggested_category(), Some("dining"));
        assert_eq!(state.effective_category(), Some("groceries"));
        assert_eq!(state.effective_payee_name(), Some("Corner Shop"));
    }

    #[tokio::test]
    async fn test_override_without_category_keeps_status() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Dinner", None)])
            .await
            .unwrap();

        let update = h
            .pipeline
            .categorization
            .update_category(
                &ctx(),
                &tx_id("T-1"),
                CategoryOverride::default().with_memo("note"),
            )
            .await
            .unwrap();

        assert_eq!(update.state.status(), ProcessingStatus::Imported);
        assert_eq!(update.state.effective_memo(), Some("note"));
    }

    #[tokio::test]
    async fn test_override_validation() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        let service = &h.pipeline.categorization;

        let empty = service
            .update_category(&ctx(), &tx_id("T-1"), CategoryOverride::category("  "))
            .await;
        assert!(matches!(empty, Err(PipelineError::BadRequest(_))));

        let unknown = service
            .update_category(&ctx(), &tx_id("T-1"), CategoryOverride::category("travel"))
            .await;
        assert!(matches!(unknown, Err(PipelineError::UnknownCategory(c)) if c == "travel"));

        let missing = service
            .update_category(&ctx(), &tx_id("T-404"), CategoryOverride::category("rent"))
            .await;
        assert!(matches!(missing, Err(PipelineError::NotFound(_))));

        h.pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;
        let submitted = service
            .update_category(&ctx(), &tx_id("T-1"), CategoryOverride::category("rent"))
            .await;
        assert!(matches!(
            submitted,
            Err(PipelineError::Transition(TransitionError::AlreadySubmitted))
        ));
    }

    #[tokio::test]
    async fn test_bulk_update_matches_description() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(
                &ctx(),
                &account(),
                vec![
                    raw("T-1", "Coffee at Joe's", None),
                    raw("T-2", "COFFEE beans", None),
                    raw("T-3", "Rent", None),
                ],
            )
            .await
            .unwrap();

        let report = h
            .pipeline
            .categorization
            .bulk_update_category(
                &ctx(),
                &TransactionFilter::description_contains("coffee"),
                CategoryOverride::category("Dining Out"),
            )
            .await
            .unwrap();

        assert_eq!(report.updated_count(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(
            report.event.kind,
            EventKind::CategoryBulkUpdated {
                updated_count: 2,
                category_id: "dining".to_string()
            }
        );
        assert_eq!(state(&h, "T-2").await.effective_category(), Some("dining"));
        assert_eq!(state(&h, "T-3").await.status(), ProcessingStatus::Imported);
    }

    #[tokio::test]
    async fn test_bulk_update_requires_category() {
        let h = harness();
        let result = h
            .pipeline
            .categorization
            .bulk_update_category(
                &ctx(),
                &TransactionFilter::default(),
                CategoryOverride::default().with_memo("x"),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::BadRequest(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_submit_records_destination_ids() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;

        assert_eq!(report.submitted_count(), 1);
        let state = state(&h, "T-1").await;
        assert_eq!(state.status(), ProcessingStatus::Submitted);
        assert_eq!(state.destination_transaction_id(), Some("dest-T-1"));
        assert_eq!(state.destination_account_id(), Some("budget-main"));
        assert!(state.submitted_at().is_some());
        assert_eq!(
            h.submitter.calls(),
            vec![(tx_id("T-1"), "budget-main".to_string())]
        );

        let types: Vec<&str> = report.events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["transaction.submitted", "submission.completed"]);
    }

    #[tokio::test]
    async fn test_accepted_submission_is_recorded_despite_cancellation() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        let (cancellable, handle) = OperationContext::new(Duration::from_secs(5));
        h.submitter.cancel_while_submitting(handle);

        let report = h
            .pipeline
            .submission
            .submit_transactions(&cancellable, &[tx_id("T-1")])
            .await;

        assert!(cancellable.is_cancelled());
        assert_eq!(
            report.items[0].outcome,
            SubmissionOutcome::Submitted {
                destination_transaction_id: "dest-T-1".to_string()
            }
        );
        let state = state(&h, "T-1").await;
        assert_eq!(state.status(), ProcessingStatus::Submitted);
        assert_eq!(state.destination_transaction_id(), Some("dest-T-1"));

        // Nothing left to send on the next run.
        let again = h.pipeline.submission.submit_ready(&ctx()).await.unwrap();
        assert!(again.items.is_empty());
        assert_eq!(h.submitter.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_submission_keeps_committed_items() {
        let h = harness_with_concurrency(1);
        import_categorized(&h, &["T-1", "T-2", "T-3"]).await;
        let (ctx, handle) = OperationContext::new(Duration::from_secs(5));
        h.submitter.cancel_while_submitting(handle);

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx, &[tx_id("T-1"), tx_id("T-2"), tx_id("T-3")])
            .await;

        assert_eq!(report.submitted_count(), 1);
        assert_eq!(report.failed_count(), 2);
        let cancelled =
            SubmissionOutcome::Failed(SubmissionFailure::Interrupted(Interrupted::Cancelled));
        assert_eq!(report.items[1].outcome, cancelled);
        assert_eq!(report.items[2].outcome, cancelled);
        assert!(matches!(
            report.events.last().map(|e| &e.kind),
            Some(EventKind::SubmissionCompleted {
                submitted_count: 1,
                failed_count: 2
            })
        ));

        assert_eq!(state(&h, "T-1").await.status(), ProcessingStatus::Submitted);
        assert_eq!(state(&h, "T-2").await.status(), ProcessingStatus::Categorized);
        assert_eq!(state(&h, "T-3").await.status(), ProcessingStatus::Categorized);
        assert_eq!(h.submitter.calls(), vec![(tx_id("T-1"), "budget-main".to_string())]);
    }

    #[tokio::test]
    async fn test_submit_without_payee_is_rejected() {
        let h = harness();
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-1", "Transfer", None)])
            .await
            .unwrap();
        h.pipeline
            .categorization
            .update_category(&ctx(), &tx_id("T-1"), CategoryOverride::category("rent"))
            .await
            .unwrap();

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;

        assert_eq!(
            report.items[0].outcome,
            SubmissionOutcome::Failed(SubmissionFailure::Precondition(
                TransitionError::MissingPayee
            ))
        );
        assert_eq!(state(&h, "T-1").await.status(), ProcessingStatus::Categorized);
        assert!(h.submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_partial_failure() {
        let h = harness();
        import_categorized(&h, &["T-1", "T-2", "T-3"]).await;
        h.submitter.reject(
            &tx_id("T-2"),
            SubmissionError::Validation {
                transaction_ids: vec![tx_id("T-2")],
                message: "amount out of range".into(),
            },
        );

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1"), tx_id("T-2"), tx_id("T-3")])
            .await;

        assert_eq!(report.submitted_count(), 2);
        assert_eq!(report.failed_count(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, &tx_id("T-2"));
        assert!(matches!(
            failures[0].1,
            SubmissionFailure::Destination(SubmissionError::Validation { .. })
        ));

        let failed = state(&h, "T-2").await;
        assert_eq!(failed.status(), ProcessingStatus::Categorized);
        assert!(failed.destination_transaction_id().is_none());
        assert!(matches!(
            report.events.last().map(|e| &e.kind),
            Some(EventKind::SubmissionCompleted {
                submitted_count: 2,
                failed_count: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_resubmission_is_rejected_without_calling_port() {
        let h = harness();
        import_categorized(&h, &["T-1"]).await;
        h.pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-1")])
            .await;

        assert_eq!(
            report.items[0].outcome,
            SubmissionOutcome::Failed(SubmissionFailure::Precondition(
                TransitionError::AlreadySubmitted
            ))
        );
        assert_eq!(h.submitter.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_never_submitted() {
        let h = harness();
        import_categorized(&h, &["T-1", "T-2"]).await;
        h.pipeline
            .import
            .flag_duplicate(&ctx(), &tx_id("T-2"), true)
            .await
            .unwrap();

        assert_eq!(
            h.pipeline.submission.ready(&ctx()).await.unwrap(),
            vec![tx_id("T-1")]
        );

        let report = h
            .pipeline
            .submission
            .submit_transactions(&ctx(), &[tx_id("T-2")])
            .await;
        assert_eq!(
            report.items[0].outcome,
            SubmissionOutcome::Failed(SubmissionFailure::Precondition(TransitionError::Duplicate))
        );
        assert!(h.submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_destination_mapping() {
        let h = harness();
        let other = AccountId::new("savings").unwrap();
        h.pipeline
            .import
            .import_transactions(&ctx(), &other, vec![raw("S-1", "Interest", Some("Bank"))])
            .await
            .unwrap();
        let id = TransactionId::new(other, "S-1").unwrap();
        h.pipeline
            .categorization
            .update_category(
                &ctx(),
                &id,
                CategoryOverride::category("rent").with_payee("Bank"),
            )
            .await
            .unwrap();

        let report = h.pipeline.submission.submit_transactions(&ctx(), &[id]).await;

        assert_eq!(
            report.items[0].outcome,
            SubmissionOutcome::Failed(SubmissionFailure::Precondition(
                TransitionError::MissingDestinationAccount
            ))
        );
        assert!(h.submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_ready_and_status_counts() {
        let h = harness();
        import_categorized(&h, &["T-1", "T-2"]).await;
        h.pipeline
            .import
            .import_transactions(&ctx(), &account(), vec![raw("T-3", "Pending", None)])
            .await
            .unwrap();

        let report = h.pipeline.submission.submit_ready(&ctx()).await.unwrap();
        assert_eq!(report.submitted_count(), 2);

        let counts = h.pipeline.status_counts(&ctx()).await.unwrap();
        assert_eq!(counts.imported, 1);
        assert_eq!(counts.categorized, 0);
        assert_eq!(counts.submitted, 2);
        assert_eq!(counts.total(), 3);
    }
}
