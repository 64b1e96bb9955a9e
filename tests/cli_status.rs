#[path = "util.rs"]
mod util;

use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn ledger_cmd(db_path: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("asset-ledger")?;
    cmd.env("ASSET_LEDGER_LOG", "asset_ledger=warn")
        .env_remove("ASSET_LEDGER_LOG_DIR")
        .arg("--db")
        .arg(db_path);
    Ok(cmd)
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn migrate_creates_schema_and_reports_versions() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("nested").join("ledger.sqlite3");

    let output = ledger_cmd(&db_path)?.arg("migrate").output()?;
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout_of(&output),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Ledger schema is up to date"));
    assert!(stdout.contains("202610010920_assignments.sql"));
    assert!(db_path.exists());
    Ok(())
}

#[test]
fn status_on_clean_ledger_succeeds() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("ledger.sqlite3");

    let output = ledger_cmd(&db_path)?.args(["status", "--json"]).output()?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["assets"], 0);
    assert_eq!(report["drifted"].as_array().map(Vec::len), Some(0));
    assert_eq!(report["schema"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[tokio::test]
async fn drift_is_reported_then_reconciled() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("ledger.sqlite3");

    let pool = util::file_pool(&db_path, 1).await;
    sqlx::query(
        "INSERT INTO assets (id, equipment_kind, current_holder, status, version, created_at, updated_at)
         VALUES ('drifted-1', 'laptop', 'Alice', 'available', 1, 0, 0)",
    )
    .execute(&pool)
    .await?;
    pool.close().await;

    let output = ledger_cmd(&db_path)?.args(["status", "--json"]).output()?;
    assert_eq!(output.status.code(), Some(1));
    let report: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["drifted"][0]["asset_id"], "drifted-1");
    assert_eq!(report["drifted"][0]["drift"][0]["kind"], "holder_mismatch");

    let output = ledger_cmd(&db_path)?
        .args(["reconcile", "--dry-run"])
        .output()?;
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("would repair: holder Alice -> -"));

    let output = ledger_cmd(&db_path)?.arg("reconcile").output()?;
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("Reconciled 1 asset(s)."));

    let output = ledger_cmd(&db_path)?.arg("status").output()?;
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("Drifted      : 0"));
    Ok(())
}

#[test]
fn unknown_asset_is_an_error() -> Result<()> {
    let tmp = tempdir()?;
    let db_path = tmp.path().join("ledger.sqlite3");

    let output = ledger_cmd(&db_path)?
        .args(["reconcile", "--asset", "missing"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("LEDGER/NOT_FOUND"));
    Ok(())
}
