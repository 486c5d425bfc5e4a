//! # Ledger Sync
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the store adapter
//! - Build the pipeline services over file-backed ports
//! - Run one CLI command and queue the events it produced

mod adapters;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_sync_hex::{
    OperationContext, Pipeline, PipelineSettings, RetryPolicy, RetryingSubmitter,
    RuleCategorizer, SubmissionOutcome,
};
use ledger_sync_repo::{EventRelay, Repo, build_repo};
use ledger_sync_types::{
    AccountId, CategoryOverride, DateRange, EventOutbox, PipelineEvent, TransactionFilter,
    TransactionId,
};

use adapters::{JsonFileSource, JsonLinesSubmitter, RulesFile, StaticCategories};
use config::Config;

type AppPipeline =
    Pipeline<Repo, RuleCategorizer, StaticCategories, RetryingSubmitter<JsonLinesSubmitter>>;

#[derive(Parser)]
#[command(name = "ledger-sync")]
#[command(author, version, about = "Bank feed to budget sync pipeline", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LEDGER_SYNC_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Import raw transactions from a JSON bank-feed export
    Import {
        #[arg(long)]
        account: String,
        /// JSON array of raw transactions
        #[arg(long)]
        file: PathBuf,
        /// First booking date to import (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last booking date to import (defaults to today)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Run the categorization rules
    Categorize {
        /// Account of the given ids
        #[arg(long)]
        account: Option<String>,
        /// External ids to categorize (all pending when omitted)
        #[arg(long = "id", value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Override category, payee or memo of one transaction
    Override {
        #[arg(long)]
        account: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        payee: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Set the category of every transaction matching a description
    BulkOverride {
        /// Case-insensitive text to look for in the description
        #[arg(long)]
        contains: String,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        category: String,
        #[arg(long)]
        payee: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Flag a transaction as a duplicate, or clear the flag
    Duplicate {
        #[arg(long)]
        account: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        clear: bool,
    },
    /// Submit categorized transactions to the destination
    Submit {
        /// Account of the given ids
        #[arg(long)]
        account: Option<String>,
        /// External ids to submit (everything ready when omitted)
        #[arg(long = "id", value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Show processing status
    Status {
        /// Print every processing state
        #[arg(long)]
        list: bool,
    },
    /// Deliver queued events to the configured webhook
    Relay {
        /// Deliver what is pending and exit
        #[arg(long)]
        once: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ledger_sync_hex=debug,ledger_sync_app=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn build_pipeline(config: &Config, repo: Arc<Repo>) -> Result<AppPipeline> {
    let rules = if config.rules_path.exists() {
        RulesFile::load(&config.rules_path)?
    } else {
        warn!(path = %config.rules_path.display(), "Rules file not found, no rules loaded");
        RulesFile::default()
    };
    let (categorizer, categories) = rules.into_parts()?;
    info!(rules = categorizer.len(), "Loaded categorization rules");

    let submitter = RetryingSubmitter::new(
        JsonLinesSubmitter::new(&config.export_path),
        RetryPolicy::default(),
    );

    Ok(Pipeline::new(
        repo,
        Arc::new(categorizer),
        Arc::new(categories),
        Arc::new(submitter),
        PipelineSettings {
            concurrency: config.concurrency,
            min_confidence: config.min_confidence,
            targets: config.account_map.clone(),
        },
    ))
}

/// Logs events and queues them for the relay.
async fn publish(repo: &Repo, events: &[PipelineEvent]) -> Result<()> {
    for event in events {
        info!(event_type = event.event_type(), event_id = %event.id, "Event");
    }
    repo.append_events(events).await?;
    Ok(())
}

fn transaction_ids(account: Option<&str>, ids: &[String]) -> Result<Vec<TransactionId>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let account = account.ok_or_else(|| anyhow::anyhow!("--account is required with --id"))?;
    let account = AccountId::new(account)?;
    ids.iter()
        .map(|id| Ok(TransactionId::new(account.clone(), id.as_str())?))
        .collect()
}

fn optional(text: Option<&str>) -> &str {
    text.unwrap_or("-")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Load configuration
    let config = Config::from_env()?;

    // Build repository (handles connection and migration)
    let repo = Arc::new(build_repo(&config.database_url).await?);
    info!(backend = repo.backend(), "Store ready");

    let (ctx, cancel) = OperationContext::new(config.timeout);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after in-flight calls");
            cancel.cancel();
        }
    });

    run_command(&ctx, &config, repo, cli.command).await
}

async fn run_command(
    ctx: &OperationContext,
    config: &Config,
    repo: Arc<Repo>,
    command: Commands,
) -> Result<()> {
    let pipeline = build_pipeline(config, repo.clone())?;
    let shared = repo.clone();
    let repo = repo.as_ref();

    match command {
        Commands::Import {
            account,
            file,
            from,
            to,
        } => {
            let account = AccountId::new(account)?;
            let range = DateRange::new(
                from.unwrap_or(NaiveDate::MIN),
                to.unwrap_or_else(|| Utc::now().date_naive()),
            )?;
            let source = JsonFileSource::new(file);
            let report = pipeline
                .import
                .import_from_source(ctx, &source, &account, range, &RetryPolicy::none())
                .await?;

            println!(
                "✓ Batch {}: {} imported, {} duplicates, {} rejected, {} failed",
                report.batch_id,
                report.imported_count(),
                report.duplicate_count(),
                report.rejected.len(),
                report.failed.len()
            );
            for item in report.rejected.iter().chain(&report.failed) {
                println!("  ✗ {}: {}", item.external_id, item.reason);
            }
            publish(repo, &[report.completed_event()]).await?;
        }

        Commands::Categorize { account, ids } => {
            let ids = transaction_ids(account.as_deref(), &ids)?;
            let report = if ids.is_empty() {
                pipeline.categorization.categorize_pending(ctx).await?
            } else {
                pipeline.categorization.categorize_transactions(ctx, &ids).await?
            };

            let average = report
                .average_confidence
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "✓ {} of {} categorized, average confidence {}",
                report.categorized_count,
                report.items.len(),
                average
            );
            for item in &report.items {
                println!("  {} {:?}", item.transaction_id, item.outcome);
            }
            publish(repo, &report.events).await?;
        }

        Commands::Override {
            account,
            id,
            category,
            payee,
            memo,
        } => {
            let id = TransactionId::new(AccountId::new(account)?, id)?;
            let change = CategoryOverride {
                category_id: category,
                memo,
                payee_name: payee,
            };
            let update = pipeline
                .categorization
                .update_category(ctx, &id, change)
                .await?;

            println!(
                "✓ {} is {} (category {}, payee {})",
                id,
                update.state.status(),
                optional(update.state.effective_category()),
                optional(update.state.effective_payee_name())
            );
            publish(repo, &[update.event]).await?;
        }

        Commands::BulkOverride {
            contains,
            account,
            category,
            payee,
            memo,
        } => {
            let filter = TransactionFilter {
                description_contains: Some(contains),
                account_id: account.map(AccountId::new).transpose()?,
                status: None,
            };
            let change = CategoryOverride {
                category_id: Some(category),
                memo,
                payee_name: payee,
            };
            let report = pipeline
                .categorization
                .bulk_update_category(ctx, &filter, change)
                .await?;

            println!("✓ {} transactions updated", report.updated_count());
            for (id, reason) in &report.failed {
                println!("  ✗ {}: {}", id, reason);
            }
            publish(repo, &[report.event]).await?;
        }

        Commands::Duplicate { account, id, clear } => {
            let id = TransactionId::new(AccountId::new(account)?, id)?;
            let state = pipeline.import.flag_duplicate(ctx, &id, !clear).await?;
            println!("✓ {} duplicate = {}", id, state.is_duplicate());
        }

        Commands::Submit { account, ids } => {
            let ids = transaction_ids(account.as_deref(), &ids)?;
            let report = if ids.is_empty() {
                pipeline.submission.submit_ready(ctx).await?
            } else {
                pipeline.submission.submit_transactions(ctx, &ids).await
            };

            println!(
                "✓ {} submitted, {} failed",
                report.submitted_count(),
                report.failed_count()
            );
            for item in &report.items {
                match &item.outcome {
                    SubmissionOutcome::Submitted {
                        destination_transaction_id,
                    } => println!("  ✓ {} -> {}", item.transaction_id, destination_transaction_id),
                    SubmissionOutcome::Failed(reason) => {
                        println!("  ✗ {}: {}", item.transaction_id, reason)
                    }
                }
            }
            publish(repo, &report.events).await?;
        }

        Commands::Status { list } => {
            let counts = pipeline.status_counts(ctx).await?;
            println!(
                "Imported: {}\nCategorized: {}\nSubmitted: {}\nDuplicates: {}",
                counts.imported, counts.categorized, counts.submitted, counts.duplicates
            );
            if list {
                for state in pipeline.list_states(ctx, None).await? {
                    println!(
                        "{}\t{}\t{}\t{}{}",
                        state.transaction_id(),
                        state.status(),
                        optional(state.effective_category()),
                        optional(state.effective_payee_name()),
                        if state.is_duplicate() { "\tduplicate" } else { "" }
                    );
                }
            }
        }

        Commands::Relay { once } => {
            run_relay(ctx, config, shared, once).await?;
        }
    }
    Ok(())
}

async fn run_relay(
    ctx: &OperationContext,
    config: &Config,
    repo: Arc<Repo>,
    once: bool,
) -> Result<()> {
    let url = config
        .webhook_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("EVENT_WEBHOOK_URL environment variable is required"))?;

    let mut relay = EventRelay::new(repo, url).with_poll_interval(Duration::from_secs(5));
    if let Some(secret) = &config.webhook_secret {
        relay = relay.with_secret(secret);
    }

    if once {
        let report = relay.drain().await?;
        println!("✓ {} delivered, {} failed", report.delivered, report.failed);
        return Ok(());
    }

    // Runs until Ctrl-C cancels the context.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(relay.run(shutdown_rx));
    ctx.cancelled().await;
    info!("Shutting down relay");
    shutdown_tx.send_replace(true);
    worker.await?;
    Ok(())
}
