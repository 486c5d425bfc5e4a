//! File-backed adapters for the ports: a JSON bank-feed export, a TOML rules
//! and categories file, and a JSON-lines export standing in for the
//! destination system.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use ledger_sync_hex::{RuleCategorizer, RuleConfig};
use ledger_sync_types::{
    AccountId, Category, CategorySource, CategorySourceError, DateRange, ProcessingState,
    RawTransaction, RawTransactionSource, SourceError, SubmissionError, SubmissionPort,
    SubmissionReceipt, Transaction,
};

// ─────────────────────────────────────────────────────────────────────────────
// Bank feed
// ─────────────────────────────────────────────────────────────────────────────

/// Reads raw transactions from a JSON array on disk.
///
/// Items without a date are passed through so the import can report them.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RawTransactionSource for JsonFileSource {
    async fn fetch(
        &self,
        _account_id: &AccountId,
        range: DateRange,
    ) -> Result<Vec<RawTransaction>, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Unexpected(format!("{}: {}", self.path.display(), e)))?;
        let raws: Vec<RawTransaction> = serde_json::from_str(&contents)
            .map_err(|e| SourceError::Unexpected(format!("{}: {}", self.path.display(), e)))?;

        Ok(raws
            .into_iter()
            .filter(|raw| raw.date.is_none_or(|d| range.contains(d)))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rules and categories
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of the rules file.
///
/// ```toml
/// [[categories]]
/// id = "groceries"
/// name = "Groceries"
///
/// [[rules]]
/// pattern = "lidl"
/// category = "groceries"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl RulesFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read rules file {}: {}", path.display(), e))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse rules file {}: {}", path.display(), e))
    }

    /// Compiles the rules and hands out the category list.
    pub fn into_parts(self) -> anyhow::Result<(RuleCategorizer, StaticCategories)> {
        let categorizer = RuleCategorizer::new(self.rules)?;
        Ok((categorizer, StaticCategories::new(self.categories)))
    }
}

/// Category source backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticCategories {
    categories: Vec<Category>,
}

impl StaticCategories {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }
}

#[async_trait]
impl CategorySource for StaticCategories {
    async fn list_categories(&self) -> Result<Vec<Category>, CategorySourceError> {
        Ok(self.categories.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Destination
// ─────────────────────────────────────────────────────────────────────────────

/// One exported line.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportRecord {
    pub destination_transaction_id: String,
    pub destination_account_id: String,
    pub source_account_id: String,
    pub external_id: String,
    pub date: chrono::NaiveDate,
    pub amount: i64,
    pub currency: String,
    pub payee: Option<String>,
    pub category: Option<String>,
    pub memo: Option<String>,
}

/// Appends each accepted submission to a JSON-lines file.
pub struct JsonLinesSubmitter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSubmitter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SubmissionPort for JsonLinesSubmitter {
    async fn submit(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
        destination_account_id: &str,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        if tx.amount.amount() == 0 {
            return Err(SubmissionError::Validation {
                transaction_ids: vec![tx.id.clone()],
                message: "Zero-amount transactions are not accepted".into(),
            });
        }

        let record = ExportRecord {
            destination_transaction_id: Uuid::new_v4().to_string(),
            destination_account_id: destination_account_id.to_string(),
            source_account_id: tx.id.account_id().to_string(),
            external_id: tx.id.external_id().to_string(),
            date: tx.date,
            amount: tx.amount.amount(),
            currency: tx.amount.currency().code().to_string(),
            payee: state.effective_payee_name().map(str::to_string),
            category: state.effective_category().map(str::to_string),
            memo: state.effective_memo().map(str::to_string),
        };
        let mut line =
            serde_json::to_string(&record).map_err(|e| SubmissionError::Unexpected(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SubmissionError::Unexpected(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SubmissionError::Unexpected(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SubmissionError::Unexpected(e.to_string()))?;

        Ok(SubmissionReceipt {
            destination_transaction_id: record.destination_transaction_id,
            status: "exported".into(),
        })
    }
}
