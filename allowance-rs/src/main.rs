//! allowance-rs: operator CLI for participant quotas
//!
//! # Usage
//!
//! ```bash
//! # Show a participant's quota
//! allowance-rs status alice --db sqlite://allowance.db
//!
//! # Record one action (exits with 2 when exhausted)
//! allowance-rs consume alice
//!
//! # Grant three extra actions
//! allowance-rs grant alice --count 3
//!
//! # List all stored quotas
//! allowance-rs list --json
//! ```

use allowance_rs::config::Config;
use allowance_rs::quota::{ConsumeOutcome, ParticipationQuota, QuotaManager};
use allowance_rs::store::SqliteQuotaStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status for a consume refused because the quota is exhausted
const EXIT_EXHAUSTED: i32 = 2;

#[derive(Parser)]
#[command(name = "allowance-rs")]
#[command(version, about = "Manage participant allowances", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overrides [storage].database_url (e.g., sqlite://allowance.db)
    #[arg(short, long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a participant's quota and admission state
    Status {
        /// Participant identifier
        participant: String,
    },
    /// Record one action for a participant
    Consume {
        /// Participant identifier
        participant: String,
    },
    /// Grant extra allowance to a participant
    Grant {
        /// Participant identifier
        participant: String,
        /// Number of extra actions
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// List all stored quotas
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a participant's stored quota
    Delete {
        /// Participant identifier
        participant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.database_url = db;
    }

    init_logging(&config);
    debug!("Configuration loaded: {:?}", config);

    let store = Arc::new(SqliteQuotaStore::connect(&config.storage.database_url).await?);
    let manager = QuotaManager::from_config(&config, store)?;

    match cli.command {
        Commands::Status { participant } => {
            let quota = manager.get_quota(&participant).await?;
            print_quota(&quota, manager.state(&quota).as_str());
        }
        Commands::Consume { participant } => match manager.consume_for(&participant).await {
            Ok(ConsumeOutcome::Allowance { remaining }) => {
                println!("✓ {} acted ({} left)", participant, remaining);
            }
            Ok(ConsumeOutcome::TimeBonus) => {
                println!("✓ {} acted using the period bonus", participant);
            }
            Err(e) if e.is_quota_exhausted() => {
                eprintln!("✗ {}", e);
                std::process::exit(EXIT_EXHAUSTED);
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Grant { participant, count } => {
            let quota = manager.grant_extra_for(&participant, count).await?;
            println!(
                "✓ Granted {} to {} ({} left)",
                count,
                participant,
                quota.allowance_left()
            );
        }
        Commands::List { json } => {
            let quotas = manager.list_quotas().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&quotas)?);
            } else if quotas.is_empty() {
                println!("No quotas found.");
            } else {
                println!(
                    "{:<30} {:<10} {:<8} {:<16} {:<26}",
                    "Participant", "Left", "Extra", "State", "Last Action"
                );
                println!("{:-<92}", "");

                for quota in &quotas {
                    let last_action = quota
                        .last_action_at()
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_else(|| "Never".to_string());
                    println!(
                        "{:<30} {:<10} {:<8} {:<16} {:<26}",
                        quota.participant_id(),
                        quota.allowance_left(),
                        quota.extra_granted(),
                        manager.state(quota).as_str(),
                        last_action
                    );
                }

                println!("\nTotal: {} quota(s)", quotas.len());
            }
        }
        Commands::Delete { participant } => {
            if manager.delete_quota(&participant).await? {
                info!("Deleted quota for {}", participant);
                println!("✓ Quota for {} deleted", participant);
            } else {
                eprintln!("Error: No quota stored for {}", participant);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `[logging].level`.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

fn print_quota(quota: &ParticipationQuota, state: &str) {
    println!("Participant:  {}", quota.participant_id());
    println!("State:        {}", state);
    println!("Allowance:    {}", quota.allowance_left());
    println!("Extra total:  {}", quota.extra_granted());
    match quota.last_action_at() {
        Some(at) => println!("Last action:  {}", at.to_rfc3339()),
        None => println!("Last action:  Never"),
    }
}
