//! Domain models for the ledger sync pipeline.

pub mod category;
pub mod confidence;
pub mod event;
pub mod ids;
pub mod money;
pub mod processing_state;
pub mod transaction;

pub use category::{Category, CategoryOverride, CategorySuggestion};
pub use confidence::{ConfidenceLevel, ConfidenceScore};
pub use event::{DeliveryStatus, EventKind, OutboxEvent, PipelineEvent};
pub use ids::{AccountId, ImportBatchId, TransactionId};
pub use money::{Currency, Money};
pub use processing_state::{ProcessingState, ProcessingStateRecord, ProcessingStatus};
pub use transaction::{Counterparty, Transaction};
