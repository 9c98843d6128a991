//! Expenses CLI - Command line interface for the ledger store.
//!
//! This tool opens the settings and ledger stores, prompting for the
//! passphrase when they are encrypted, and runs one operation on them.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use expenses_common::{Document, Error, Passphrase, Revision};
use expenses_store::{
    InitResponse, LedgerEntry, RemoteDescriptor, Settings, StoreConfig, StoreManager,
};

#[derive(Parser)]
#[command(name = "expenses")]
#[command(about = "Expenses - Encrypted double-entry ledger store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Store configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for SQLite collections (ignored with --config).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the stores and report their state.
    Init,

    /// Show or change settings.
    Settings(SettingsArgs),

    /// Add a ledger entry.
    Add {
        /// Entry date (YYYY-MM-DD, default: today).
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        description: String,

        /// Account receiving the amount.
        #[arg(long)]
        destination: String,

        /// Account the amount comes from.
        #[arg(long)]
        source: String,

        /// Amount in minor units.
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,

        /// Currency (default: the settings' default currency).
        #[arg(long)]
        currency: Option<String>,
    },

    /// List ledger entries, newest first.
    List {
        /// Token printed by a previous page.
        #[arg(long)]
        page_token: Option<String>,

        /// Entries per page (default: from configuration).
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Delete a ledger entry.
    Delete {
        id: String,
        revision: String,
    },

    /// Import ledger entries from a JSON array.
    Import { file: PathBuf },

    /// Export all ledger entries as a JSON array.
    Export {
        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replicate the ledger with a remote database once.
    Replicate {
        /// Database URL of a CouchDB-compatible server.
        #[arg(long, conflicts_with = "alias", required_unless_present = "alias")]
        url: Option<String>,

        /// Username for the remote; the password is prompted.
        #[arg(long, requires = "url")]
        username: Option<String>,

        /// Another collection of the same backend.
        #[arg(long)]
        alias: Option<String>,
    },

    /// Irreversibly delete settings and ledger.
    DeleteAll {
        #[arg(long)]
        yes: bool,
    },

    /// Irreversibly delete the ledger, keeping settings.
    DeleteLedger {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct SettingsArgs {
    /// Default currency.
    #[arg(long)]
    currency: Option<String>,

    /// Destination accounts (replaces the current list).
    #[arg(long = "destination")]
    destinations: Vec<String>,

    /// Source accounts (replaces the current list).
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Encrypt the stores under a new passphrase.
    #[arg(long, conflicts_with = "decrypt")]
    encrypt: bool,

    /// Decrypt the stores.
    #[arg(long)]
    decrypt: bool,
}

impl SettingsArgs {
    fn changes_anything(&self) -> bool {
        self.currency.is_some()
            || !self.destinations.is_empty()
            || !self.sources.is_empty()
            || self.encrypt
            || self.decrypt
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.data_dir.as_deref()).await?;

    match cli.command {
        Commands::Init => cmd_init(config).await,
        Commands::Settings(args) => cmd_settings(config, args).await,
        Commands::Add {
            date,
            description,
            destination,
            source,
            amount,
            currency,
        } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            cmd_add(config, date, description, destination, source, amount, currency).await
        }
        Commands::List {
            page_token,
            page_size,
        } => cmd_list(config, page_token.as_deref(), page_size).await,
        Commands::Delete { id, revision } => cmd_delete(config, &id, &revision).await,
        Commands::Import { file } => cmd_import(config, &file).await,
        Commands::Export { output } => cmd_export(config, output.as_deref()).await,
        Commands::Replicate {
            url,
            username,
            alias,
        } => cmd_replicate(config, url, username, alias).await,
        Commands::DeleteAll { yes } => cmd_delete_all(config, yes).await,
        Commands::DeleteLedger { yes } => cmd_delete_ledger(config, yes).await,
    }
}

/// Resolve the store configuration from the command line.
async fn load_config(config: Option<&Path>, data_dir: Option<&Path>) -> Result<StoreConfig> {
    if let Some(path) = config {
        return StoreConfig::load(path)
            .await
            .with_context(|| format!("Failed to load configuration {}", path.display()));
    }

    let data_dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_dir()
            .context("No data directory on this platform, use --data-dir")?
            .join("expenses"),
    };
    Ok(StoreConfig::sqlite(data_dir))
}

/// Prompt for a passphrase securely.
fn prompt_passphrase(prompt: &str) -> Result<Passphrase> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Passphrase::new(passphrase).context("Passphrase cannot be empty")
}

/// Prompt for a new passphrase twice.
fn prompt_new_passphrase() -> Result<Passphrase> {
    let passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = Zeroizing::new(
        rpassword::prompt_password("Confirm passphrase: ").context("Failed to read passphrase")?,
    );
    if passphrase.as_bytes() != confirm.as_bytes() {
        anyhow::bail!("Passphrases do not match");
    }
    Ok(passphrase)
}

/// Open the stores, asking for the passphrase when they are encrypted.
async fn open_manager(config: StoreConfig) -> Result<(StoreManager, InitResponse)> {
    let mut manager = StoreManager::from_config(config).context("Invalid store configuration")?;

    let response = manager.initialize().await.context("Failed to open stores")?;
    let response = match response {
        InitResponse::Encrypted => {
            let passphrase = prompt_passphrase("Passphrase: ")?;
            match manager.open_with_passphrase(passphrase).await {
                Err(Error::InvalidPassphrase) => anyhow::bail!("Invalid passphrase"),
                other => other.context("Failed to open encrypted stores")?,
            }
        }
        response => response,
    };
    Ok((manager, response))
}

fn print_settings(settings: &Settings) {
    println!("Settings:");
    println!("  Default currency: {}", settings.default_currency);
    println!("  Destination accounts: {}", settings.destination_accounts.join(", "));
    println!("  Source accounts: {}", settings.source_accounts.join(", "));
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "{}  {:<30} {:>10} {}  {} <- {}",
        entry.date,
        entry.description,
        entry.destination.amount,
        entry.destination.currency,
        entry.destination.account,
        entry.source.account
    );
    println!(
        "            id: {}  revision: {}",
        entry.id,
        entry.version.as_ref().map(Revision::as_str).unwrap_or("-")
    );
}

async fn cmd_init(config: StoreConfig) -> Result<()> {
    let (manager, response) = open_manager(config).await?;

    let state = if manager.is_encrypted()? { "encrypted" } else { "plaintext" };
    match response {
        InitResponse::FirstRun => println!("First run: no settings saved yet ({} stores).", state),
        InitResponse::Ok(settings) => {
            println!("Stores are open ({}).", state);
            print_settings(&settings);
        }
        InitResponse::Encrypted => println!("Stores are encrypted."),
    }
    Ok(())
}

async fn cmd_settings(config: StoreConfig, args: SettingsArgs) -> Result<()> {
    let (mut manager, response) = open_manager(config).await?;

    let mut settings = match response {
        InitResponse::Ok(settings) => settings,
        _ => Settings::new("USD"),
    };
    if !args.changes_anything() {
        print_settings(&settings);
        return Ok(());
    }

    if let Some(currency) = args.currency {
        settings.default_currency = currency;
    }
    if !args.destinations.is_empty() {
        settings.destination_accounts = args.destinations;
    }
    if !args.sources.is_empty() {
        settings.source_accounts = args.sources;
    }

    let passphrase = if args.encrypt {
        Some(prompt_new_passphrase()?)
    } else if args.decrypt {
        None
    } else {
        manager.passphrase()?.cloned()
    };

    info!("Saving settings");
    let saved = manager
        .save_settings(settings, passphrase)
        .await
        .context("Failed to save settings")?;
    print_settings(&saved);
    println!(
        "Stores are {}.",
        if manager.is_encrypted()? { "encrypted" } else { "plaintext" }
    );
    Ok(())
}

async fn cmd_add(
    config: StoreConfig,
    date: NaiveDate,
    description: String,
    destination: String,
    source: String,
    amount: i64,
    currency: Option<String>,
) -> Result<()> {
    let (manager, response) = open_manager(config).await?;

    let currency = match (currency, response) {
        (Some(currency), _) => currency,
        (None, InitResponse::Ok(settings)) => settings.default_currency,
        (None, _) => anyhow::bail!("No settings saved yet, pass --currency"),
    };

    let entry = LedgerEntry::new(date, description, destination, source, currency, amount);
    let saved = manager.save_entry(entry).await.context("Failed to save entry")?;
    println!("Entry added:");
    print_entry(&saved);
    Ok(())
}

async fn cmd_list(config: StoreConfig, page_token: Option<&str>, page_size: Option<usize>) -> Result<()> {
    let page_size = page_size.unwrap_or(config.page_size);
    let (manager, _) = open_manager(config).await?;

    let page = manager
        .list_entries(page_token, page_size)
        .await
        .context("Failed to list entries")?;

    if page.items.is_empty() {
        println!("No entries.");
    }
    for entry in &page.items {
        print_entry(entry);
    }
    if let Some(token) = page.next_page_token {
        println!("\nNext page: --page-token {}", token);
    }
    Ok(())
}

async fn cmd_delete(config: StoreConfig, id: &str, revision: &str) -> Result<()> {
    let revision = Revision::parse(revision).context("Invalid revision")?;
    let (manager, _) = open_manager(config).await?;

    manager
        .delete_entry(id, &revision)
        .await
        .with_context(|| format!("Failed to delete {}", id))?;
    println!("Entry deleted: {}", id);
    Ok(())
}

async fn cmd_import(config: StoreConfig, file: &Path) -> Result<()> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let values: Vec<Value> = serde_json::from_str(&json).context("Expected a JSON array of entries")?;

    let mut entries = Vec::with_capacity(values.len());
    for value in values {
        let mut entry = Document::from_value(value)
            .and_then(LedgerEntry::from_document)
            .context("Invalid entry in import file")?;
        // Imported entries are new to this store.
        entry.version = None;
        entries.push(entry);
    }

    let (manager, _) = open_manager(config).await?;
    let outcomes = manager
        .save_entries(entries)
        .await
        .context("Failed to import entries")?;

    let written = outcomes.iter().filter(|o| o.is_written()).count();
    println!("Imported {} of {} entries.", written, outcomes.len());
    for outcome in outcomes.iter().filter(|o| !o.is_written()) {
        println!("  Skipped existing entry: {}", outcome.id());
    }
    Ok(())
}

async fn cmd_export(config: StoreConfig, output: Option<&Path>) -> Result<()> {
    let (manager, _) = open_manager(config).await?;

    let values = manager
        .list_all_entries()
        .await
        .context("Failed to read entries")?
        .iter()
        .map(|entry| entry.to_document()?.to_value())
        .collect::<expenses_common::Result<Vec<_>>>()?;
    let json = serde_json::to_string_pretty(&values)?;

    match output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} entries to {}", values.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_replicate(
    config: StoreConfig,
    url: Option<String>,
    username: Option<String>,
    alias: Option<String>,
) -> Result<()> {
    let remote = match (url, alias) {
        (Some(url), _) => match username {
            Some(username) => {
                let password = Zeroizing::new(
                    rpassword::prompt_password("Remote password: ")
                        .context("Failed to read password")?,
                );
                RemoteDescriptor::url(url, username, password.as_str())
            }
            None => RemoteDescriptor::Url {
                url,
                credentials: None,
            },
        },
        (None, Some(alias)) => RemoteDescriptor::Alias(alias),
        (None, None) => anyhow::bail!("Pass --url or --alias"),
    };

    let (manager, _) = open_manager(config).await?;
    let report = manager.replicate(remote).await.context("Replication failed")?;
    println!(
        "Replication complete: {} pushed, {} pulled.",
        report.pushed, report.pulled
    );
    Ok(())
}

async fn cmd_delete_all(config: StoreConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("This deletes settings and ledger irreversibly, pass --yes to confirm");
    }
    let (mut manager, _) = open_manager(config).await?;
    manager.delete_all().await.context("Failed to delete stores")?;
    println!("All data deleted.");
    Ok(())
}

async fn cmd_delete_ledger(config: StoreConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("This deletes the ledger irreversibly, pass --yes to confirm");
    }
    let (mut manager, _) = open_manager(config).await?;
    manager
        .delete_ledger_only()
        .await
        .context("Failed to delete ledger")?;
    println!("Ledger deleted, settings kept.");
    Ok(())
}
