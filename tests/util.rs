#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use asset_ledger_lib::{
    db, migrate, Asset, EquipmentKind, IdentityDirectory, KnownIdentities, LedgerConfig,
    LedgerFacade, NewAsset,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub const PEOPLE: &[&str] = &["Alice", "Bob", "Carol", "Dave"];

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn memory_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

/// WAL database on disk, so several connections can race for the writer.
pub async fn file_pool(path: &Path, max_connections: u32) -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(db::connect_options(path, Duration::from_millis(2_000)))
        .await
        .expect("open file database");
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        db_path: ":memory:".into(),
        ..LedgerConfig::default()
    }
}

pub fn directory() -> Arc<dyn IdentityDirectory> {
    KnownIdentities::new(PEOPLE.iter().copied()).shared()
}

pub async fn ledger() -> LedgerFacade {
    ledger_with(test_config()).await
}

pub async fn ledger_with(config: LedgerConfig) -> LedgerFacade {
    LedgerFacade::new(memory_pool().await, config, directory())
}

pub async fn laptop(ledger: &LedgerFacade) -> Asset {
    let mut input = NewAsset::new(EquipmentKind::Laptop);
    input.model = Some("ThinkPad T14".into());
    input.department = Some("IT".into());
    ledger.register_asset(input).await.expect("register laptop")
}

pub async fn open_interval_count(pool: &SqlitePool, asset_id: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM custody_intervals WHERE asset_id = ? AND \"to\" IS NULL",
    )
    .bind(asset_id)
    .fetch_one(pool)
    .await
    .expect("count open intervals")
}
