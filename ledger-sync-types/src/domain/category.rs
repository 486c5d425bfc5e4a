//! Budget categories, automated suggestions and user overrides.

use serde::{Deserialize, Serialize};

use super::confidence::ConfidenceScore;
use super::transaction::non_blank;

/// A destination-system budget category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Output of a categorization strategy for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub category_id: Option<String>,
    pub payee_name: Option<String>,
    pub memo: Option<String>,
    pub confidence: Option<ConfidenceScore>,
    pub payee_confidence: Option<ConfidenceScore>,
}

impl CategorySuggestion {
    /// A suggestion that matched nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Trims every text field, mapping blanks to `None`.
    pub fn normalized(self) -> Self {
        Self {
            category_id: non_blank(self.category_id),
            payee_name: non_blank(self.payee_name),
            memo: non_blank(self.memo),
            ..self
        }
    }

    pub fn has_category(&self) -> bool {
        self.category_id.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Drops the category; payee, memo and scores are kept.
    pub fn without_category(self) -> Self {
        Self {
            category_id: None,
            ..self
        }
    }
}

/// A correction made by a user. Fields left `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOverride {
    pub category_id: Option<String>,
    pub memo: Option<String>,
    pub payee_name: Option<String>,
}

impl CategoryOverride {
    pub fn category(category_id: impl Into<String>) -> Self {
        Self {
            category_id: Some(category_id.into()),
            ..Self::default()
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_payee(mut self, payee_name: impl Into<String>) -> Self {
        self.payee_name = Some(payee_name.into());
        self
    }

    pub fn normalized(self) -> Self {
        Self {
            category_id: non_blank(self.category_id),
            memo: non_blank(self.memo),
            payee_name: non_blank(self.payee_name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category_id.is_none() && self.memo.is_none() && self.payee_name.is_none()
    }
}
