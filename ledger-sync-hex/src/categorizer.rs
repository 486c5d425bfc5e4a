//! Rule-based categorization strategy.
//!
//! Rules are tried by descending priority (file order breaks ties); the
//! first rule matching the transaction description or counterparty name
//! wins. `contains` and `starts_with` compare case-insensitively, `regex`
//! patterns are used as written.

use async_trait::async_trait;
use ledger_sync_types::{
    CategorizationStrategy, CategorySuggestion, ConfidenceScore, StrategyError, Transaction,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    StartsWith,
    Regex,
}

fn default_confidence() -> f64 {
    0.9
}

/// A rule as written in the rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub category: String,
    #[serde(default)]
    pub payee: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule for category {0} has an empty pattern")]
    EmptyPattern(String),

    #[error("Invalid regex {pattern}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
enum Matcher {
    Contains(String),
    StartsWith(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Contains(needle) => text.to_uppercase().contains(needle.as_str()),
            Self::StartsWith(prefix) => text.trim_start().to_uppercase().starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

#[derive(Debug)]
struct Rule {
    matcher: Matcher,
    category: String,
    payee: Option<String>,
    memo: Option<String>,
    confidence: ConfidenceScore,
    priority: i64,
}

impl TryFrom<RuleConfig> for Rule {
    type Error = RuleError;

    fn try_from(config: RuleConfig) -> Result<Self, Self::Error> {
        let pattern = config.pattern.trim();
        if pattern.is_empty() {
            return Err(RuleError::EmptyPattern(config.category));
        }
        let matcher = match config.match_type {
            MatchType::Contains => Matcher::Contains(pattern.to_uppercase()),
            MatchType::StartsWith => Matcher::StartsWith(pattern.to_uppercase()),
            MatchType::Regex => Matcher::Regex(Regex::new(pattern).map_err(|source| {
                RuleError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
        };
        Ok(Self {
            matcher,
            category: config.category,
            payee: config.payee,
            memo: config.memo,
            confidence: ConfidenceScore::new(config.confidence),
            priority: config.priority,
        })
    }
}

/// Categorization strategy driven by pattern rules.
#[derive(Debug, Default)]
pub struct RuleCategorizer {
    rules: Vec<Rule>,
}

impl RuleCategorizer {
    pub fn new(configs: Vec<RuleConfig>) -> Result<Self, RuleError> {
        let mut rules = configs
            .into_iter()
            .map(Rule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort keeps file order within one priority.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The suggestion for `tx`, without going through the async port.
    pub fn suggest(&self, tx: &Transaction) -> CategorySuggestion {
        let counterparty = tx.counterparty.name.as_deref();
        let candidates: Vec<&str> = [tx.description(), counterparty]
            .into_iter()
            .flatten()
            .collect();

        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| candidates.iter().any(|text| rule.matcher.is_match(text)))
        else {
            return CategorySuggestion {
                payee_name: counterparty.map(str::to_string),
                ..CategorySuggestion::none()
            };
        };

        let payee_name = rule
            .payee
            .clone()
            .or_else(|| counterparty.map(str::to_string));
        CategorySuggestion {
            category_id: Some(rule.category.clone()),
            payee_confidence: payee_name.as_ref().map(|_| rule.confidence),
            payee_name,
            memo: rule.memo.clone(),
            confidence: Some(rule.confidence),
        }
    }
}

#[async_trait]
impl CategorizationStrategy for RuleCategorizer {
    async fn categorize(&self, tx: &Transaction) -> Result<CategorySuggestion, StrategyError> {
        Ok(self.suggest(tx))
    }
}
