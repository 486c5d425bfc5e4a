//! # Ledger Sync Hex
//!
//! Application service layer for the ledger sync pipeline.
//!
//! ## Architecture
//!
//! - `import` - raw bank-feed data into transactions and processing states
//! - `categorization` - automated suggestions and user overrides
//! - `submission` - categorized transactions out to the destination system
//! - `pipeline` - the services wired together, plus reporting lookups
//!
//! Services are generic over `R: PipelineStore` and their ports, so any
//! store adapter and any strategy or destination can be injected. They
//! share one [`KeyedLocks`] map, which serializes writes per transaction.

pub mod categorization;
pub mod categorizer;
pub mod context;
pub mod import;
pub mod locks;
pub mod pipeline;
pub mod retry;
pub mod submission;

#[cfg(test)]
mod service_tests;

/// Default number of items a batch works on at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

pub use categorization::{
    BulkUpdateReport, CategorizationItem, CategorizationOutcome, CategorizationReport,
    CategorizationService, CategoryUpdate, SkipReason, calculate_average_confidence,
};
pub use categorizer::{MatchType, RuleCategorizer, RuleConfig, RuleError};
pub use context::{CancelHandle, DEFAULT_TIMEOUT, OperationContext};
pub use import::{ImportReport, ImportService, RejectedRaw};
pub use locks::KeyedLocks;
pub use pipeline::{Pipeline, PipelineSettings};
pub use retry::{RetryPolicy, Retryable, RetryingSubmitter};
pub use submission::{
    SubmissionFailure, SubmissionItem, SubmissionOutcome, SubmissionReport, SubmissionService,
};
