use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Asset, AssetStatus, Entity};
use crate::repo::{self, Filter, Order, Table};
use crate::time::now_ms;

impl TryFrom<&SqliteRow> for Asset {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            equipment_kind: repo::label(row, "equipment_kind")?,
            model: row.try_get("model")?,
            serial_number: row.try_get("serial_number")?,
            asset_tag: row.try_get("asset_tag")?,
            department: row.try_get("department")?,
            location: row.try_get("location")?,
            current_holder: row.try_get("current_holder")?,
            status: repo::label(row, "status")?,
            last_maintenance_date: row.try_get("last_maintenance_date")?,
            next_maintenance_date: row.try_get("next_maintenance_date")?,
            attributes: repo::json_map(row, "attributes_json")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn load(conn: &mut SqliteConnection, id: &str) -> LedgerResult<Option<Asset>> {
    let row = repo::get(conn, Table::Assets, id).await?;
    Ok(row.as_ref().map(Asset::try_from).transpose()?)
}

pub async fn require(conn: &mut SqliteConnection, id: &str) -> LedgerResult<Asset> {
    load(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found(Entity::Asset, id))
}

pub async fn list(conn: &mut SqliteConnection) -> LedgerResult<Vec<Asset>> {
    let rows = repo::find(
        conn,
        Table::Assets,
        &Filter::new(),
        &[Order::asc("created_at"), Order::asc("id")],
        None,
        None,
    )
    .await?;
    Ok(rows
        .iter()
        .map(Asset::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

pub async fn insert(conn: &mut SqliteConnection, asset: &Asset) -> LedgerResult<()> {
    let mut row = Map::new();
    row.insert("id".into(), Value::from(asset.id.as_str()));
    row.insert("equipment_kind".into(), Value::from(asset.equipment_kind.as_str()));
    row.insert("model".into(), Value::from(asset.model.clone()));
    row.insert("serial_number".into(), Value::from(asset.serial_number.clone()));
    row.insert("asset_tag".into(), Value::from(asset.asset_tag.clone()));
    row.insert("department".into(), Value::from(asset.department.clone()));
    row.insert("location".into(), Value::from(asset.location.clone()));
    row.insert("current_holder".into(), Value::from(asset.current_holder.clone()));
    row.insert("status".into(), Value::from(asset.status.as_str()));
    row.insert(
        "last_maintenance_date".into(),
        Value::from(asset.last_maintenance_date),
    );
    row.insert(
        "next_maintenance_date".into(),
        Value::from(asset.next_maintenance_date),
    );
    row.insert("attributes_json".into(), repo::json_text(&asset.attributes));
    row.insert("version".into(), Value::from(asset.version));
    row.insert("created_at".into(), Value::from(asset.created_at));
    row.insert("updated_at".into(), Value::from(asset.updated_at));
    repo::insert(conn, Table::Assets, &row).await
}

pub async fn delete(conn: &mut SqliteConnection, id: &str) -> LedgerResult<()> {
    if repo::delete(conn, Table::Assets, id).await? == 0 {
        return Err(LedgerError::not_found(Entity::Asset, id));
    }
    Ok(())
}

/// Rejects a caller-supplied version that no longer matches the stored row.
pub fn check_version(asset: &Asset, expected: Option<i64>) -> LedgerResult<()> {
    match expected {
        Some(version) if version != asset.version => {
            Err(LedgerError::conflict(Entity::Asset, &asset.id))
        }
        _ => Ok(()),
    }
}

/// Fields of the asset row that are derived from the history logs. A field
/// left as `None` is not written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionUpdate {
    pub current_holder: Option<Option<String>>,
    pub department: Option<Option<String>>,
    pub status: Option<AssetStatus>,
    pub last_maintenance_date: Option<Option<i64>>,
    pub next_maintenance_date: Option<Option<i64>>,
}

impl ProjectionUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ProjectionUpdate::default()
    }

    /// Drops fields that already hold the requested value.
    pub fn against(mut self, asset: &Asset) -> Self {
        if self.current_holder.as_ref() == Some(&asset.current_holder) {
            self.current_holder = None;
        }
        if self.department.as_ref() == Some(&asset.department) {
            self.department = None;
        }
        if self.status == Some(asset.status) {
            self.status = None;
        }
        if self.last_maintenance_date == Some(asset.last_maintenance_date) {
            self.last_maintenance_date = None;
        }
        if self.next_maintenance_date == Some(asset.next_maintenance_date) {
            self.next_maintenance_date = None;
        }
        self
    }

    fn into_patch(self, now: i64) -> Map<String, Value> {
        let mut patch = Map::new();
        if let Some(holder) = self.current_holder {
            patch.insert("current_holder".into(), Value::from(holder));
        }
        if let Some(department) = self.department {
            patch.insert("department".into(), Value::from(department));
        }
        if let Some(status) = self.status {
            patch.insert("status".into(), Value::from(status.as_str()));
        }
        if let Some(last) = self.last_maintenance_date {
            patch.insert("last_maintenance_date".into(), Value::from(last));
        }
        if let Some(next) = self.next_maintenance_date {
            patch.insert("next_maintenance_date".into(), Value::from(next));
        }
        patch.insert("updated_at".into(), Value::from(now));
        patch
    }
}

/// Writes `update` onto the row `seen` was read from, guarded by its version.
/// Returns the row as stored afterwards. A concurrent writer that bumped the
/// version first turns this into `ConcurrentModification`.
pub async fn write_projection(
    conn: &mut SqliteConnection,
    seen: &Asset,
    update: ProjectionUpdate,
) -> LedgerResult<Asset> {
    let update = update.against(seen);
    if update.is_empty() {
        return Ok(seen.clone());
    }
    let patch = update.into_patch(now_ms());
    let filter = Filter::by_id(&seen.id).eq("version", seen.version);
    if repo::update_where(conn, Table::Assets, &filter, &patch).await? == 0 {
        return Err(LedgerError::conflict(Entity::Asset, &seen.id));
    }
    require(conn, &seen.id).await
}
