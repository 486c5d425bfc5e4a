//! # Ledger Sync Types
//!
//! Domain types and port traits for the bank-feed to budget sync pipeline.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (identifiers, Transaction, ProcessingState)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for port boundaries
//! - `error/` - Domain and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    AccountId, Category, CategoryOverride, CategorySuggestion, ConfidenceLevel, ConfidenceScore,
    Counterparty, Currency, DeliveryStatus, EventKind, ImportBatchId, Money, OutboxEvent,
    PipelineEvent, ProcessingState, ProcessingStateRecord, ProcessingStatus, Transaction,
    TransactionId,
};
pub use dto::*;
pub use error::{DomainError, Interrupted, PipelineError, RepoError, TransitionError};
pub use ports::{
    CategorizationStrategy, CategorySource, CategorySourceError, EventOutbox, InsertOutcome,
    PipelineStore, ProcessingStateStore, RawTransactionSource, SourceError, StrategyError,
    SubmissionError, SubmissionPort, TransactionStore,
};
