//! Configuration loading from environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ledger_sync_hex::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT};
use ledger_sync_types::AccountId;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rules_path: PathBuf,
    /// Source account to destination account
    pub account_map: HashMap<AccountId, String>,
    pub timeout: Duration,
    pub concurrency: usize,
    pub min_confidence: f64,
    pub export_path: PathBuf,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let rules_path = lookup("LEDGER_SYNC_RULES")
            .unwrap_or_else(|| "rules.toml".to_string())
            .into();

        let account_map = match lookup("LEDGER_SYNC_ACCOUNT_MAP") {
            Some(raw) => parse_account_map(&raw)?,
            None => HashMap::new(),
        };

        let timeout = match lookup("LEDGER_SYNC_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(secs.parse()?),
            None => DEFAULT_TIMEOUT,
        };

        let concurrency = match lookup("LEDGER_SYNC_CONCURRENCY") {
            Some(n) => n.parse()?,
            None => DEFAULT_CONCURRENCY,
        };
        if concurrency == 0 {
            anyhow::bail!("LEDGER_SYNC_CONCURRENCY must be at least 1");
        }

        let min_confidence: f64 = match lookup("LEDGER_SYNC_MIN_CONFIDENCE") {
            Some(v) => v.parse()?,
            None => ledger_sync_hex::categorization::DEFAULT_MIN_CONFIDENCE,
        };
        if !(0.0..=1.0).contains(&min_confidence) {
            anyhow::bail!("LEDGER_SYNC_MIN_CONFIDENCE must be between 0 and 1");
        }

        let export_path = lookup("LEDGER_SYNC_EXPORT_PATH")
            .unwrap_or_else(|| "submissions.jsonl".to_string())
            .into();

        Ok(Self {
            database_url,
            rules_path,
            account_map,
            timeout,
            concurrency,
            min_confidence,
            export_path,
            webhook_url: lookup("EVENT_WEBHOOK_URL").filter(|s| !s.trim().is_empty()),
            webhook_secret: lookup("EVENT_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
        })
    }
}

/// Parses `source=destination` pairs separated by commas.
pub fn parse_account_map(raw: &str) -> anyhow::Result<HashMap<AccountId, String>> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (source, destination) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid account mapping '{}', expected source=destination", pair))?;
        let destination = destination.trim();
        if destination.is_empty() {
            anyhow::bail!("Account mapping '{}' has an empty destination", pair);
        }
        map.insert(AccountId::new(source.trim())?, destination.to_string());
    }
    Ok(map)
}
