use std::time::Duration;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tranche_core::{Bank, Commitment, Currency, NewCreditLine, NewFixedAdvance, SettingKey};
use tranche_store::{FacilityStore, StoreError, StoreResult};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "tranche-cli", version, about = "Credit facility and fixed advance register")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database file and schema.
    Init,
    /// Manage counterparty banks.
    #[command(subcommand)]
    Bank(BankCommand),
    /// Manage credit lines.
    #[command(subcommand)]
    Line(LineCommand),
    /// Manage fixed advances.
    #[command(subcommand)]
    Advance(AdvanceCommand),
    /// Show the last issued value of an identifier sequence.
    Seq { name: String },
    /// Read or write persisted settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum BankCommand {
    Add { key: String, name: String },
    List,
    Rm { key: String },
}

#[derive(Subcommand)]
enum LineCommand {
    Add {
        bank_key: String,
        currency: Currency,
        amount: i64,
        committed: Commitment,
        start_date: NaiveDate,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    List,
    Rm { id: String },
}

#[derive(Subcommand)]
enum AdvanceCommand {
    Add {
        bank: String,
        credit_line_id: String,
        currency: Currency,
        amount: i64,
        interest: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        continuation_date: NaiveDate,
    },
    List,
    Rm { id: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Get,
    Set { key: SettingKey, value: String },
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load()?;
    debug!(db_path = %cfg.db_path.display(), "opening register");
    let store = FacilityStore::open(&cfg.db_path)?
        .with_busy_timeout(Duration::from_millis(cfg.busy_timeout_ms));

    match cli.command {
        Command::Init => {
            // Opening the store already created the schema.
            println!("initialized register at {}", cfg.db_path.display());
        }
        Command::Bank(cmd) => run_bank(&store, cmd)?,
        Command::Line(cmd) => run_line(&store, cmd)?,
        Command::Advance(cmd) => run_advance(&store, cmd)?,
        Command::Seq { name } => {
            println!("{name} = {}", report(store.sequence_value(&name))?);
        }
        Command::Settings(cmd) => run_settings(&store, cmd)?,
    }
    Ok(())
}

fn run_bank(store: &FacilityStore, cmd: BankCommand) -> Result<()> {
    match cmd {
        BankCommand::Add { key, name } => {
            report(store.upsert_bank(&Bank { key: key.clone(), name }))?;
            println!("saved bank {key}");
        }
        BankCommand::List => {
            for bank in report(store.banks())? {
                println!("{}\t{}", bank.key, bank.name);
            }
        }
        BankCommand::Rm { key } => {
            report(store.delete_bank(&key))?;
            println!("removed bank {key}");
        }
    }
    Ok(())
}

fn run_line(store: &FacilityStore, cmd: LineCommand) -> Result<()> {
    match cmd {
        LineCommand::Add {
            bank_key,
            currency,
            amount,
            committed,
            start_date,
            end_date,
            description,
            note,
        } => {
            let id = report(store.create_credit_line(&NewCreditLine {
                bank_key,
                description,
                currency,
                amount,
                committed,
                start_date,
                end_date,
                note,
            }))?;
            println!("created credit line {id}");
        }
        LineCommand::List => {
            for line in report(store.credit_lines())? {
                println!(
                    "{}\t{}\t{} {}\t{}",
                    line.id,
                    line.bank_name.as_deref().unwrap_or(&line.bank_key),
                    line.currency,
                    line.amount,
                    line.description.as_deref().unwrap_or("-"),
                );
            }
        }
        LineCommand::Rm { id } => {
            report(store.delete_credit_line(&id))?;
            println!("removed credit line {id}");
        }
    }
    Ok(())
}

fn run_advance(store: &FacilityStore, cmd: AdvanceCommand) -> Result<()> {
    match cmd {
        AdvanceCommand::Add {
            bank,
            credit_line_id,
            currency,
            amount,
            interest,
            start_date,
            end_date,
            continuation_date,
        } => {
            let id = report(store.create_advance(&NewFixedAdvance {
                bank,
                credit_line_id,
                start_date,
                end_date,
                continuation_date,
                currency,
                amount_original: amount,
                interest_amount: interest,
            }))?;
            println!("created advance {id}");
        }
        AdvanceCommand::List => {
            for advance in report(store.advances())? {
                println!(
                    "{}\t{}\t{} {}\t{} -> {}",
                    advance.id,
                    advance.credit_line_id,
                    advance.currency,
                    advance.amount_original,
                    advance.start_date,
                    advance.end_date,
                );
            }
        }
        AdvanceCommand::Rm { id } => {
            report(store.delete_advance(&id))?;
            println!("removed advance {id}");
        }
    }
    Ok(())
}

fn run_settings(store: &FacilityStore, cmd: SettingsCommand) -> Result<()> {
    match cmd {
        SettingsCommand::Get => {
            let settings = report(store.settings())?;
            for key in SettingKey::ALL {
                println!("{key} = {}", settings[&key]);
            }
        }
        SettingsCommand::Set { key, value } => {
            report(store.set_setting(key, &value))?;
            println!("saved {key}");
        }
    }
    Ok(())
}

/// Map the retryable contention condition to an operator-friendly message;
/// everything else propagates as-is.
fn report<T>(result: StoreResult<T>) -> Result<T> {
    match result {
        Err(StoreError::Busy) => bail!("the register is busy with another writer; please try again"),
        other => Ok(other?),
    }
}
