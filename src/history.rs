//! Append and query access to the two history logs: custody intervals and
//! maintenance records. Nothing here enforces ledger rules; callers hold the
//! transaction and decide what a write means.

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use crate::error::LedgerResult;
use crate::models::{CustodyInterval, MaintenanceRecord};
use crate::repo::{self, Filter, Order, Table};

impl TryFrom<&SqliteRow> for CustodyInterval {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            asset_id: row.try_get("asset_id")?,
            holder: row.try_get("holder")?,
            department: row.try_get("department")?,
            from: row.try_get("from")?,
            to: row.try_get("to")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for MaintenanceRecord {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            asset_id: row.try_get("asset_id")?,
            maintenance_type: repo::label(row, "maintenance_type")?,
            technician_name: row.try_get("technician_name")?,
            date_performed: row.try_get("date_performed")?,
            next_maintenance_date: row.try_get("next_maintenance_date")?,
            notes: row.try_get("notes")?,
            inspection: repo::json_map(row, "inspection_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_all<T>(rows: Vec<SqliteRow>) -> LedgerResult<Vec<T>>
where
    T: for<'r> TryFrom<&'r SqliteRow, Error = sqlx::Error>,
{
    Ok(rows
        .iter()
        .map(T::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

// Newest first. Ties on the date fall back to insertion order; ids are v7
// UUIDs and sort by creation time.
const CUSTODY_NEWEST_FIRST: &[Order] = &[
    Order {
        column: "from",
        descending: true,
    },
    Order {
        column: "created_at",
        descending: true,
    },
    Order {
        column: "id",
        descending: true,
    },
];

const MAINTENANCE_MOST_RECENT_FIRST: &[Order] = &[
    Order {
        column: "date_performed",
        descending: true,
    },
    Order {
        column: "created_at",
        descending: true,
    },
    Order {
        column: "id",
        descending: true,
    },
];

// ---- custody ----------------------------------------------------------------

pub async fn custody_history(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Vec<CustodyInterval>> {
    let rows = repo::find(
        conn,
        Table::CustodyIntervals,
        &Filter::new().eq("asset_id", asset_id),
        CUSTODY_NEWEST_FIRST,
        None,
        None,
    )
    .await?;
    decode_all(rows)
}

/// All intervals with no end for the asset. More than one means the store is
/// corrupt; the reconcile pass reports it.
pub async fn open_intervals(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Vec<CustodyInterval>> {
    let rows = repo::find(
        conn,
        Table::CustodyIntervals,
        &Filter::new().eq("asset_id", asset_id).is_null("to"),
        CUSTODY_NEWEST_FIRST,
        None,
        None,
    )
    .await?;
    decode_all(rows)
}

pub async fn open_interval(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Option<CustodyInterval>> {
    Ok(open_intervals(conn, asset_id).await?.into_iter().next())
}

/// The closed interval that ended last.
pub async fn latest_closed_interval(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Option<CustodyInterval>> {
    let rows = repo::find(
        conn,
        Table::CustodyIntervals,
        &Filter::new().eq("asset_id", asset_id).not_null("to"),
        &[Order::desc("to"), Order::desc("created_at")],
        Some(1),
        None,
    )
    .await?;
    Ok(decode_all(rows)?.into_iter().next())
}

pub async fn append_interval(
    conn: &mut SqliteConnection,
    interval: &CustodyInterval,
) -> LedgerResult<()> {
    let mut row = Map::new();
    row.insert("id".into(), Value::from(interval.id.as_str()));
    row.insert("asset_id".into(), Value::from(interval.asset_id.as_str()));
    row.insert("holder".into(), Value::from(interval.holder.clone()));
    row.insert("department".into(), Value::from(interval.department.clone()));
    row.insert("from".into(), Value::from(interval.from));
    row.insert("to".into(), Value::from(interval.to));
    row.insert("reason".into(), Value::from(interval.reason.clone()));
    row.insert("created_at".into(), Value::from(interval.created_at));
    repo::insert(conn, Table::CustodyIntervals, &row).await
}

/// Sets `to` on an interval that is still open. Returns false when the
/// interval was already closed (or is gone), leaving it untouched.
pub async fn close_interval(
    conn: &mut SqliteConnection,
    interval_id: &str,
    to: i64,
) -> LedgerResult<bool> {
    let mut patch = Map::new();
    patch.insert("to".into(), Value::from(to));
    let changed = repo::update_where(
        conn,
        Table::CustodyIntervals,
        &Filter::by_id(interval_id).is_null("to"),
        &patch,
    )
    .await?;
    Ok(changed == 1)
}

pub async fn purge_custody(conn: &mut SqliteConnection, asset_id: &str) -> LedgerResult<u64> {
    repo::delete_where(
        conn,
        Table::CustodyIntervals,
        &Filter::new().eq("asset_id", asset_id),
    )
    .await
}

// ---- maintenance ------------------------------------------------------------

pub async fn maintenance_record(
    conn: &mut SqliteConnection,
    id: &str,
) -> LedgerResult<Option<MaintenanceRecord>> {
    let row = repo::get(conn, Table::MaintenanceRecords, id).await?;
    Ok(row.as_ref().map(MaintenanceRecord::try_from).transpose()?)
}

/// Records for the asset by `date_performed`, most recent first.
pub async fn maintenance_history(
    conn: &mut SqliteConnection,
    asset_id: &str,
    limit: Option<i64>,
) -> LedgerResult<Vec<MaintenanceRecord>> {
    let rows = repo::find(
        conn,
        Table::MaintenanceRecords,
        &Filter::new().eq("asset_id", asset_id),
        MAINTENANCE_MOST_RECENT_FIRST,
        limit,
        None,
    )
    .await?;
    decode_all(rows)
}

pub async fn most_recent_maintenance(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Option<MaintenanceRecord>> {
    Ok(maintenance_history(conn, asset_id, Some(1))
        .await?
        .into_iter()
        .next())
}

fn maintenance_row(record: &MaintenanceRecord) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("id".into(), Value::from(record.id.as_str()));
    row.insert("asset_id".into(), Value::from(record.asset_id.as_str()));
    row.insert(
        "maintenance_type".into(),
        Value::from(record.maintenance_type.as_str()),
    );
    row.insert(
        "technician_name".into(),
        Value::from(record.technician_name.as_str()),
    );
    row.insert("date_performed".into(), Value::from(record.date_performed));
    row.insert(
        "next_maintenance_date".into(),
        Value::from(record.next_maintenance_date),
    );
    row.insert("notes".into(), Value::from(record.notes.clone()));
    row.insert("inspection_json".into(), repo::json_text(&record.inspection));
    row.insert("created_at".into(), Value::from(record.created_at));
    row.insert("updated_at".into(), Value::from(record.updated_at));
    row
}

pub async fn append_maintenance(
    conn: &mut SqliteConnection,
    record: &MaintenanceRecord,
) -> LedgerResult<()> {
    repo::insert(conn, Table::MaintenanceRecords, &maintenance_row(record)).await
}

/// Overwrites the stored record with `record`. Returns false if it vanished.
pub async fn replace_maintenance(
    conn: &mut SqliteConnection,
    record: &MaintenanceRecord,
) -> LedgerResult<bool> {
    let mut row = maintenance_row(record);
    row.remove("id");
    row.remove("asset_id");
    row.remove("created_at");
    let changed = repo::update(conn, Table::MaintenanceRecords, &record.id, &row).await?;
    Ok(changed == 1)
}

pub async fn remove_maintenance(conn: &mut SqliteConnection, id: &str) -> LedgerResult<bool> {
    Ok(repo::delete(conn, Table::MaintenanceRecords, id).await? == 1)
}

pub async fn purge_maintenance(conn: &mut SqliteConnection, asset_id: &str) -> LedgerResult<u64> {
    repo::delete_where(
        conn,
        Table::MaintenanceRecords,
        &Filter::new().eq("asset_id", asset_id),
    )
    .await
}
