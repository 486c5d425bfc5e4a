//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod categorization;
mod repository;
mod source;
mod submission;

pub use categorization::{
    CategorizationStrategy, CategorySource, CategorySourceError, StrategyError,
};
pub use repository::{
    EventOutbox, InsertOutcome, PipelineStore, ProcessingStateStore, TransactionStore,
};
pub use source::{RawTransactionSource, SourceError};
pub use submission::{SubmissionError, SubmissionPort};
