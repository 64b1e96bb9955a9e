#[path = "util.rs"]
mod util;

use anyhow::Result;
use asset_ledger_lib::{migrate, Entity, LedgerError};

async fn insert_asset(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO assets (id, equipment_kind, status, version, created_at, updated_at)
         VALUES (?, 'laptop', 'available', 1, 0, 0)",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn open_interval(pool: &sqlx::SqlitePool, id: &str, asset_id: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO custody_intervals (id, asset_id, holder, \"from\", \"to\", created_at)
         VALUES (?, ?, 'Alice', 10, NULL, 0)",
    )
    .bind(id)
    .bind(asset_id)
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn migrations_apply_once_and_rerun_cleanly() -> Result<()> {
    let pool = util::temp_pool().await;
    assert!(migrate::applied_versions(&pool).await?.is_empty());

    migrate::apply_migrations(&pool).await?;
    migrate::apply_migrations(&pool).await?;

    let applied = migrate::applied_versions(&pool).await?;
    let known: Vec<String> = migrate::known_versions().map(str::to_string).collect();
    assert_eq!(applied, known);

    for table in ["assets", "custody_intervals", "maintenance_records", "assignments"] {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await?;
        assert_eq!(present, 1, "missing table {table}");
    }
    Ok(())
}

#[tokio::test]
async fn edited_migration_is_refused() -> Result<()> {
    let pool = util::memory_pool().await;
    sqlx::query("UPDATE schema_migrations SET checksum = 'tampered' WHERE version = ?")
        .bind(migrate::known_versions().next().unwrap())
        .execute(&pool)
        .await?;
    let err = migrate::apply_migrations(&pool).await.unwrap_err();
    assert!(err.to_string().contains("edited after application"));
    Ok(())
}

#[tokio::test]
async fn second_open_interval_violates_unique_index() -> Result<()> {
    let pool = util::memory_pool().await;
    insert_asset(&pool, "a1").await?;
    open_interval(&pool, "i1", "a1").await?;

    let err = open_interval(&pool, "i2", "a1").await.unwrap_err();
    let classified = LedgerError::from(err).classify(Entity::Asset, "a1");
    assert!(classified.is_conflict(), "{classified:?}");

    sqlx::query("UPDATE custody_intervals SET \"to\" = 20 WHERE id = 'i1'")
        .execute(&pool)
        .await?;
    open_interval(&pool, "i2", "a1").await?;
    assert_eq!(util::open_interval_count(&pool, "a1").await, 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_asset_tag_classifies_as_validation() -> Result<()> {
    let pool = util::memory_pool().await;
    let tagged = |id: &'static str| {
        sqlx::query(
            "INSERT INTO assets (id, asset_tag, equipment_kind, status, version, created_at, updated_at)
             VALUES (?, 'LT-0001', 'laptop', 'available', 1, 0, 0)",
        )
        .bind(id)
        .execute(&pool)
    };
    tagged("a1").await?;

    let err = tagged("a2").await.unwrap_err();
    let classified = LedgerError::from(err).classify(Entity::Asset, "a2");
    assert!(!classified.is_conflict());
    assert!(
        matches!(classified, LedgerError::Validation { field: "asset_tag", .. }),
        "{classified:?}"
    );
    assert_eq!(classified.code(), "LEDGER/VALIDATION");
    Ok(())
}

#[tokio::test]
async fn interval_cannot_end_before_it_starts() -> Result<()> {
    let pool = util::memory_pool().await;
    insert_asset(&pool, "a1").await?;
    open_interval(&pool, "i1", "a1").await?;
    let res = sqlx::query("UPDATE custody_intervals SET \"to\" = 5 WHERE id = 'i1'")
        .execute(&pool)
        .await;
    assert!(res.is_err());
    Ok(())
}

#[tokio::test]
async fn history_rows_pin_their_asset() -> Result<()> {
    let pool = util::memory_pool().await;
    insert_asset(&pool, "a1").await?;
    open_interval(&pool, "i1", "a1").await?;
    let res = sqlx::query("DELETE FROM assets WHERE id = 'a1'")
        .execute(&pool)
        .await;
    assert!(res.is_err(), "foreign key should block the delete");

    assert!(open_interval(&pool, "i9", "ghost").await.is_err());
    Ok(())
}
