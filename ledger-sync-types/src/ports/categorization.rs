//! Categorization ports: the strategy that suggests categories and the
//! source of valid categories.

use crate::domain::{Category, CategorySuggestion, Transaction};

/// Error type for categorization strategies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("Categorizer unavailable: {0}")]
    Unavailable(String),

    #[error("Categorizer failed: {0}")]
    Failed(String),
}

/// Pluggable categorization algorithm (rules, a learned model, ...).
///
/// From the service's point of view this is a pure function of the
/// transaction; it must not touch processing state.
#[async_trait::async_trait]
pub trait CategorizationStrategy: Send + Sync {
    async fn categorize(&self, tx: &Transaction) -> Result<CategorySuggestion, StrategyError>;
}

/// Error type for category listing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CategorySourceError {
    #[error("Category source unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Port trait for the destination system's category list.
#[async_trait::async_trait]
pub trait CategorySource: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>, CategorySourceError>;
}
