use sqlx::sqlite::SqliteConnection;
use tracing::info;

use crate::assets::{self, ProjectionUpdate};
use crate::config::MaintenanceCachePolicy;
use crate::error::{LedgerError, LedgerResult};
use crate::history;
use crate::id::new_uuid_v7;
use crate::models::{
    clean_text, Asset, Entity, MaintenancePatch, MaintenanceRecord, NewMaintenanceRecord,
};
use crate::time::now_ms;

fn check_schedule(date_performed: i64, next: Option<i64>) -> LedgerResult<()> {
    match next {
        Some(next) if next < date_performed => Err(LedgerError::invalid(
            "next_maintenance_date",
            format!("{next} precedes date_performed {date_performed}"),
        )),
        _ => Ok(()),
    }
}

/// Turns raw form input into a record, naming the first missing field.
fn build_record(input: &NewMaintenanceRecord, now: i64) -> LedgerResult<MaintenanceRecord> {
    let asset_id =
        clean_text(input.asset_id.as_deref()).ok_or_else(|| LedgerError::missing("asset_id"))?;
    let maintenance_type = input
        .maintenance_type
        .ok_or_else(|| LedgerError::missing("maintenance_type"))?;
    let date_performed = input
        .date_performed
        .ok_or_else(|| LedgerError::missing("date_performed"))?;
    let technician_name = clean_text(input.technician_name.as_deref())
        .ok_or_else(|| LedgerError::missing("technician_name"))?;
    check_schedule(date_performed, input.next_maintenance_date)?;

    Ok(MaintenanceRecord {
        id: new_uuid_v7(),
        asset_id,
        maintenance_type,
        technician_name,
        date_performed,
        next_maintenance_date: input.next_maintenance_date,
        notes: clean_text(input.notes.as_deref()),
        inspection: input.inspection.clone(),
        created_at: now,
        updated_at: now,
    })
}

fn apply_patch(
    mut record: MaintenanceRecord,
    patch: &MaintenancePatch,
    now: i64,
) -> LedgerResult<MaintenanceRecord> {
    if let Some(kind) = patch.maintenance_type {
        record.maintenance_type = kind;
    }
    if let Some(name) = patch.technician_name.as_deref() {
        record.technician_name =
            clean_text(Some(name)).ok_or_else(|| LedgerError::missing("technician_name"))?;
    }
    if let Some(date) = patch.date_performed {
        record.date_performed = date;
    }
    if let Some(next) = patch.next_maintenance_date {
        record.next_maintenance_date = Some(next);
    }
    if let Some(notes) = patch.notes.as_deref() {
        record.notes = clean_text(Some(notes));
    }
    if let Some(inspection) = &patch.inspection {
        record.inspection = inspection.clone();
    }
    check_schedule(record.date_performed, record.next_maintenance_date)?;
    record.updated_at = now;
    Ok(record)
}

/// Re-derives both maintenance dates from the most recently performed record
/// still on file, or clears them when none remain.
pub async fn recompute_cache(conn: &mut SqliteConnection, asset: &Asset) -> LedgerResult<Asset> {
    let top = history::most_recent_maintenance(conn, &asset.id).await?;
    let update = ProjectionUpdate {
        last_maintenance_date: Some(top.as_ref().map(|r| r.date_performed)),
        next_maintenance_date: Some(top.as_ref().and_then(|r| r.next_maintenance_date)),
        ..ProjectionUpdate::default()
    };
    let updated = assets::write_projection(conn, asset, update).await?;
    info!(
        target: "asset_ledger",
        event = "maintenance_cache_recomputed",
        asset_id = %updated.id,
        source_record = ?top.as_ref().map(|r| r.id.as_str()),
        next_maintenance_date = ?updated.next_maintenance_date
    );
    Ok(updated)
}

pub async fn record(
    conn: &mut SqliteConnection,
    input: &NewMaintenanceRecord,
    cache: MaintenanceCachePolicy,
) -> LedgerResult<MaintenanceRecord> {
    let record = build_record(input, now_ms())?;
    let asset = assets::require(conn, &record.asset_id).await?;
    history::append_maintenance(conn, &record).await?;

    match cache {
        MaintenanceCachePolicy::LatestWriteWins => {
            if let Some(next) = record.next_maintenance_date {
                assets::write_projection(
                    conn,
                    &asset,
                    ProjectionUpdate {
                        last_maintenance_date: Some(Some(record.date_performed)),
                        next_maintenance_date: Some(Some(next)),
                        ..ProjectionUpdate::default()
                    },
                )
                .await?;
            }
        }
        MaintenanceCachePolicy::Recompute => {
            recompute_cache(conn, &asset).await?;
        }
    }

    info!(
        target: "asset_ledger",
        event = "maintenance_recorded",
        asset_id = %record.asset_id,
        record_id = %record.id,
        maintenance_type = %record.maintenance_type,
        date_performed = record.date_performed,
        next_maintenance_date = ?record.next_maintenance_date
    );
    Ok(record)
}

pub async fn update(
    conn: &mut SqliteConnection,
    id: &str,
    patch: &MaintenancePatch,
    cache: MaintenanceCachePolicy,
) -> LedgerResult<MaintenanceRecord> {
    let existing = history::maintenance_record(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found(Entity::MaintenanceRecord, id))?;
    let asset = assets::require(conn, &existing.asset_id).await?;
    let record = apply_patch(existing, patch, now_ms())?;
    if !history::replace_maintenance(conn, &record).await? {
        return Err(LedgerError::conflict(Entity::MaintenanceRecord, id));
    }

    match cache {
        MaintenanceCachePolicy::LatestWriteWins => {
            if let Some(next) = patch.next_maintenance_date {
                assets::write_projection(
                    conn,
                    &asset,
                    ProjectionUpdate {
                        next_maintenance_date: Some(Some(next)),
                        ..ProjectionUpdate::default()
                    },
                )
                .await?;
            }
        }
        MaintenanceCachePolicy::Recompute => {
            recompute_cache(conn, &asset).await?;
        }
    }

    info!(
        target: "asset_ledger",
        event = "maintenance_updated",
        asset_id = %record.asset_id,
        record_id = %record.id
    );
    Ok(record)
}

/// Deletes a record and recomputes the asset's cache from what remains.
/// Returns the asset as stored afterwards.
pub async fn delete(conn: &mut SqliteConnection, id: &str) -> LedgerResult<Asset> {
    let existing = history::maintenance_record(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found(Entity::MaintenanceRecord, id))?;
    let asset = assets::require(conn, &existing.asset_id).await?;
    if !history::remove_maintenance(conn, id).await? {
        return Err(LedgerError::conflict(Entity::MaintenanceRecord, id));
    }
    info!(
        target: "asset_ledger",
        event = "maintenance_deleted",
        asset_id = %asset.id,
        record_id = %id
    );
    recompute_cache(conn, &asset).await
}
