use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use asset_ledger_lib::reconcile::{AssetAudit, Drift};
use asset_ledger_lib::{logging, migrate, AppError, KnownIdentities, LedgerConfig, LedgerFacade};

#[derive(Debug, Parser)]
#[command(
    name = "asset-ledger",
    about = "Custody and maintenance ledger maintenance tool",
    version
)]
struct Cli {
    /// Ledger database file. Overrides ASSET_LEDGER_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or upgrade the ledger schema.
    Migrate,
    /// Report assets whose projected fields disagree with their history.
    Status {
        /// Emit the report as JSON instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Recompute projected fields from history.
    Reconcile {
        /// Only this asset. Defaults to every asset with drift.
        #[arg(long)]
        asset: Option<String>,
        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = match load_config(cli.db.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(2);
        }
    };
    let guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(2);
        }
    };

    let code = match run(cli.command, config) {
        Ok(code) => code,
        Err(err) => {
            let app_error = AppError::from(err);
            eprintln!("Error: [{}] {}", app_error.code(), app_error.message());
            1
        }
    };
    // Flush the file sink; `exit` skips destructors.
    drop(guard);
    process::exit(code);
}

fn load_config(db: Option<PathBuf>) -> Result<LedgerConfig> {
    let mut config = LedgerConfig::from_env().context("read ASSET_LEDGER_* configuration")?;
    if let Some(path) = db {
        config.db_path = path;
    }
    Ok(config)
}

fn run(command: Commands, config: LedgerConfig) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async move {
        match command {
            Commands::Migrate => handle_migrate(config).await,
            Commands::Status { json } => handle_status(config, json).await,
            Commands::Reconcile { asset, dry_run } => {
                handle_reconcile(config, asset.as_deref(), dry_run).await
            }
        }
    })
}

async fn open(config: LedgerConfig) -> Result<LedgerFacade> {
    asset_ledger_lib::open_ledger(config, KnownIdentities::default().shared()).await
}

async fn handle_migrate(config: LedgerConfig) -> Result<i32> {
    let db_path = config.db_path.clone();
    let ledger = open(config).await?;
    let applied = migrate::applied_versions(ledger.pool())
        .await
        .context("read applied migrations")?;
    ledger.pool().close().await;
    println!("Ledger schema is up to date at {}", db_path.display());
    for version in applied {
        println!("  {version}");
    }
    Ok(0)
}

async fn handle_status(config: LedgerConfig, emit_json: bool) -> Result<i32> {
    let ledger = open(config).await?;
    let audits = ledger.audit_all().await.map_err(AppError::from)?;
    let schema = migrate::applied_versions(ledger.pool()).await?;
    ledger.pool().close().await;

    let drifted: Vec<&AssetAudit> = audits.iter().filter(|a| !a.is_clean()).collect();
    if emit_json {
        let payload = json!({
            "schema": schema,
            "build": env!("LEDGER_GIT_HASH"),
            "assets": audits.len(),
            "drifted": drifted,
        });
        let serialized =
            serde_json::to_string_pretty(&payload).context("serialize status report")?;
        println!("{serialized}");
    } else {
        print_status_table(audits.len(), &drifted);
    }
    Ok(if drifted.is_empty() { 0 } else { 1 })
}

async fn handle_reconcile(config: LedgerConfig, asset: Option<&str>, dry_run: bool) -> Result<i32> {
    let ledger = open(config).await?;
    let targets: Vec<AssetAudit> = match asset {
        Some(id) => vec![ledger.audit_asset(id).await.map_err(AppError::from)?],
        None => ledger
            .audit_all()
            .await
            .map_err(AppError::from)?
            .into_iter()
            .filter(|a| !a.is_clean())
            .collect(),
    };

    let mut repaired = 0usize;
    for audit in &targets {
        if audit.is_clean() {
            println!("{:<38} clean", audit.asset_id);
            continue;
        }
        if dry_run {
            println!("{:<38} would repair: {}", audit.asset_id, describe(&audit.drift));
            continue;
        }
        let outcome = ledger
            .reconcile_asset(&audit.asset_id)
            .await
            .map_err(AppError::from)?;
        repaired += 1;
        println!(
            "{:<38} repaired: {}",
            outcome.asset.id,
            describe(&outcome.audit.drift)
        );
    }
    ledger.pool().close().await;

    if targets.is_empty() {
        println!("No drift found.");
    } else if !dry_run {
        println!("Reconciled {repaired} asset(s).");
    }
    Ok(0)
}

fn describe(drift: &[Drift]) -> String {
    drift
        .iter()
        .map(|d| match d {
            Drift::MultipleOpenIntervals { interval_ids } => {
                format!("{} open intervals", interval_ids.len())
            }
            Drift::HolderMismatch { cached, expected } => format!(
                "holder {} -> {}",
                cached.as_deref().unwrap_or("-"),
                expected.as_deref().unwrap_or("-")
            ),
            Drift::LastMaintenanceMismatch { cached, expected } => {
                format!("last maintenance {} -> {}", date(*cached), date(*expected))
            }
            Drift::NextMaintenanceMismatch { cached, expected } => {
                format!("next maintenance {} -> {}", date(*cached), date(*expected))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn date(ms: Option<i64>) -> String {
    ms.map(asset_ledger_lib::time::format_ms)
        .unwrap_or_else(|| "-".to_string())
}

fn print_status_table(total: usize, drifted: &[&AssetAudit]) {
    println!("Ledger status");
    println!("Assets       : {total}");
    println!("Drifted      : {}", drifted.len());
    if drifted.is_empty() {
        return;
    }
    println!("\n{:<38} Drift", "Asset");
    for audit in drifted {
        println!("{:<38} {}", audit.asset_id, describe(&audit.drift));
    }
}
