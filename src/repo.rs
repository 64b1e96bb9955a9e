//! Generic row access over the four ledger tables.
//!
//! Every identifier is checked against the table's column allowlist and
//! double-quoted (the custody log has columns named `from` and `to`). Values
//! travel as `serde_json::Value` and are bound positionally. The functions take
//! a bare connection so callers decide the transaction boundary.

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite};
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Entity, UnknownLabel, ASSETS_TABLE, ASSIGNMENTS_TABLE, CUSTODY_TABLE, MAINTENANCE_TABLE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Assets,
    CustodyIntervals,
    MaintenanceRecords,
    Assignments,
}

const ASSET_COLUMNS: &[&str] = &[
    "id",
    "equipment_kind",
    "model",
    "serial_number",
    "asset_tag",
    "department",
    "location",
    "current_holder",
    "status",
    "last_maintenance_date",
    "next_maintenance_date",
    "attributes_json",
    "version",
    "created_at",
    "updated_at",
];

const CUSTODY_COLUMNS: &[&str] = &[
    "id",
    "asset_id",
    "holder",
    "department",
    "from",
    "to",
    "reason",
    "created_at",
];

const MAINTENANCE_COLUMNS: &[&str] = &[
    "id",
    "asset_id",
    "maintenance_type",
    "technician_name",
    "date_performed",
    "next_maintenance_date",
    "notes",
    "inspection_json",
    "created_at",
    "updated_at",
];

const ASSIGNMENT_COLUMNS: &[&str] = &[
    "id",
    "asset_id",
    "assigned_to",
    "assigned_by",
    "assignment_date",
    "expected_return_date",
    "actual_return_date",
    "status",
    "notes",
    "version",
    "created_at",
    "updated_at",
];

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Assets,
        Table::CustodyIntervals,
        Table::MaintenanceRecords,
        Table::Assignments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Assets => ASSETS_TABLE,
            Table::CustodyIntervals => CUSTODY_TABLE,
            Table::MaintenanceRecords => MAINTENANCE_TABLE,
            Table::Assignments => ASSIGNMENTS_TABLE,
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Assets => ASSET_COLUMNS,
            Table::CustodyIntervals => CUSTODY_COLUMNS,
            Table::MaintenanceRecords => MAINTENANCE_COLUMNS,
            Table::Assignments => ASSIGNMENT_COLUMNS,
        }
    }

    pub fn entity(self) -> Entity {
        match self {
            Table::Assets => Entity::Asset,
            Table::CustodyIntervals => Entity::CustodyInterval,
            Table::MaintenanceRecords => Entity::MaintenanceRecord,
            Table::Assignments => Entity::Assignment,
        }
    }

    /// Whether rows carry an optimistic `version` counter.
    pub fn is_versioned(self) -> bool {
        matches!(self, Table::Assets | Table::Assignments)
    }

    fn column(self, name: &str) -> LedgerResult<String> {
        if self.columns().contains(&name) {
            Ok(format!("\"{name}\""))
        } else {
            Err(LedgerError::invalid(
                "column",
                format!("{} has no column '{name}'", self.name()),
            ))
        }
    }

    fn select_list(self) -> String {
        self.columns()
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cond {
    Eq(&'static str, Value),
    Lt(&'static str, Value),
    IsNull(&'static str),
    NotNull(&'static str),
}

/// Conjunction of column predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conds: Vec<Cond>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("id", id)
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::Eq(column, value.into()));
        self
    }

    pub fn lt(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::Lt(column, value.into()));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conds.push(Cond::IsNull(column));
        self
    }

    pub fn not_null(mut self, column: &'static str) -> Self {
        self.conds.push(Cond::NotNull(column));
        self
    }

    fn where_clause(&self, table: Table) -> LedgerResult<(String, Vec<&Value>)> {
        if self.conds.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut parts = Vec::with_capacity(self.conds.len());
        let mut values = Vec::new();
        for cond in &self.conds {
            match cond {
                Cond::Eq(col, value) => {
                    parts.push(format!("{} = ?", table.column(col)?));
                    values.push(value);
                }
                Cond::Lt(col, value) => {
                    parts.push(format!("{} < ?", table.column(col)?));
                    values.push(value);
                }
                Cond::IsNull(col) => parts.push(format!("{} IS NULL", table.column(col)?)),
                Cond::NotNull(col) => parts.push(format!("{} IS NOT NULL", table.column(col)?)),
            }
        }
        Ok((format!(" WHERE {}", parts.join(" AND ")), values))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub descending: bool,
}

impl Order {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

fn order_clause(table: Table, order: &[Order]) -> LedgerResult<String> {
    if order.is_empty() {
        return Ok(String::new());
    }
    let parts = order
        .iter()
        .map(|o| {
            let col = table.column(o.column)?;
            Ok(format!("{col} {}", if o.descending { "DESC" } else { "ASC" }))
        })
        .collect::<LedgerResult<Vec<_>>>()?;
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(q: SqliteQuery<'q>, v: &Value) -> SqliteQuery<'q> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

pub async fn get(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
) -> LedgerResult<Option<SqliteRow>> {
    let mut rows = find(conn, table, &Filter::by_id(id), &[], Some(1), None).await?;
    Ok(rows.pop())
}

pub async fn find(
    conn: &mut SqliteConnection,
    table: Table,
    filter: &Filter,
    order: &[Order],
    limit: Option<i64>,
    offset: Option<i64>,
) -> LedgerResult<Vec<SqliteRow>> {
    let (where_sql, values) = filter.where_clause(table)?;
    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        table.select_list(),
        table.name(),
        where_sql,
        order_clause(table, order)?
    );
    match (limit, offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
    let mut query = sqlx::query(&sql);
    for value in values {
        query = bind_value(query, value);
    }
    Ok(query.fetch_all(&mut *conn).await?)
}

pub async fn count(conn: &mut SqliteConnection, table: Table, filter: &Filter) -> LedgerResult<i64> {
    let (where_sql, values) = filter.where_clause(table)?;
    let sql = format!("SELECT COUNT(*) FROM {}{}", table.name(), where_sql);
    let mut query = sqlx::query(&sql);
    for value in values {
        query = bind_value(query, value);
    }
    let row = query.fetch_one(&mut *conn).await?;
    Ok(row.try_get::<i64, _>(0)?)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    table: Table,
    row: &Map<String, Value>,
) -> LedgerResult<()> {
    if row.is_empty() {
        return Err(LedgerError::invalid("row", "insert needs at least one column"));
    }
    let cols = row
        .keys()
        .map(|c| table.column(c))
        .collect::<LedgerResult<Vec<_>>>()?;
    let placeholders = vec!["?"; cols.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        table.name(),
        cols.join(", ")
    );
    let mut query = sqlx::query(&sql);
    for value in row.values() {
        query = bind_value(query, value);
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Applies `patch` to every row matching `filter` and returns the number of
/// rows changed. Versioned tables bump `version` on every write.
pub async fn update_where(
    conn: &mut SqliteConnection,
    table: Table,
    filter: &Filter,
    patch: &Map<String, Value>,
) -> LedgerResult<u64> {
    let mut sets = patch
        .keys()
        .filter(|c| c.as_str() != "id" && c.as_str() != "version")
        .map(|c| Ok(format!("{} = ?", table.column(c)?)))
        .collect::<LedgerResult<Vec<_>>>()?;
    if table.is_versioned() {
        sets.push("\"version\" = \"version\" + 1".to_string());
    }
    if sets.is_empty() {
        return Ok(0);
    }
    let (where_sql, where_values) = filter.where_clause(table)?;
    let sql = format!("UPDATE {} SET {}{}", table.name(), sets.join(", "), where_sql);
    let mut query = sqlx::query(&sql);
    for (col, value) in patch {
        if col != "id" && col != "version" {
            query = bind_value(query, value);
        }
    }
    for value in where_values {
        query = bind_value(query, value);
    }
    let res = query.execute(&mut *conn).await?;
    Ok(res.rows_affected())
}

pub async fn update(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
    patch: &Map<String, Value>,
) -> LedgerResult<u64> {
    update_where(conn, table, &Filter::by_id(id), patch).await
}

pub async fn delete_where(
    conn: &mut SqliteConnection,
    table: Table,
    filter: &Filter,
) -> LedgerResult<u64> {
    let (where_sql, values) = filter.where_clause(table)?;
    if where_sql.is_empty() {
        return Err(LedgerError::invalid("filter", "unfiltered delete refused"));
    }
    let sql = format!("DELETE FROM {}{}", table.name(), where_sql);
    let mut query = sqlx::query(&sql);
    for value in values {
        query = bind_value(query, value);
    }
    let res = query.execute(&mut *conn).await?;
    Ok(res.rows_affected())
}

pub async fn delete(conn: &mut SqliteConnection, table: Table, id: &str) -> LedgerResult<u64> {
    delete_where(conn, table, &Filter::by_id(id)).await
}

/// Decodes a text column holding one of the crate's enum labels.
pub(crate) fn label<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownLabel>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|err: UnknownLabel| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    })
}

/// Decodes a nullable JSON object column. Missing or null means empty.
pub(crate) fn json_map(row: &SqliteRow, column: &str) -> Result<Map<String, Value>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Null) => Ok(Map::new()),
            Ok(other) => Err(sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: format!("expected a JSON object, found {other}").into(),
            }),
            Err(err) => Err(sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: Box::new(err),
            }),
        },
    }
}

pub(crate) fn json_text(map: &Map<String, Value>) -> Value {
    if map.is_empty() {
        Value::Null
    } else {
        Value::String(Value::Object(map.clone()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_quoted_and_checked() {
        assert_eq!(
            Table::CustodyIntervals.column("from").unwrap(),
            "\"from\""
        );
        let err = Table::CustodyIntervals.column("holder; DROP TABLE assets").unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "column", .. }));
    }

    #[test]
    fn filter_renders_conjunction_in_order() {
        let filter = Filter::new()
            .eq("asset_id", "a1")
            .is_null("to")
            .lt("from", 5);
        let (sql, values) = filter.where_clause(Table::CustodyIntervals).unwrap();
        assert_eq!(sql, " WHERE \"asset_id\" = ? AND \"to\" IS NULL AND \"from\" < ?");
        assert_eq!(values, vec![&Value::from("a1"), &Value::from(5)]);
    }

    #[test]
    fn order_clause_rejects_unknown_columns() {
        let sql = order_clause(
            Table::MaintenanceRecords,
            &[Order::desc("date_performed"), Order::asc("id")],
        )
        .unwrap();
        assert_eq!(sql, " ORDER BY \"date_performed\" DESC, \"id\" ASC");
        assert!(order_clause(Table::MaintenanceRecords, &[Order::asc("holder")]).is_err());
    }

    #[test]
    fn empty_maps_are_stored_as_null() {
        assert_eq!(json_text(&Map::new()), Value::Null);
        let mut map = Map::new();
        map.insert("ram_gb".into(), Value::from(16));
        assert_eq!(json_text(&map), Value::String("{\"ram_gb\":16}".into()));
    }
}
