//! Lend/return tracking. Independent of custody: nothing here reads or writes
//! the asset's holder projection.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::assets;
use crate::error::{LedgerError, LedgerResult};
use crate::id::new_uuid_v7;
use crate::models::{
    clean_text, AssetStatus, Assignment, AssignmentStatus, AssignmentStatusUpdate, Entity,
    NewAssignment, ReturnAssignment,
};
use crate::repo::{self, Filter, Order, Table};

/// Resolves free-text assignee names to known people.
pub trait IdentityDirectory: Send + Sync {
    /// Canonical spelling of `name`, or `None` when nobody by that name exists.
    fn resolve(&self, name: &str) -> Option<String>;
}

/// In-process directory keyed by case-folded name.
#[derive(Debug, Default)]
pub struct KnownIdentities {
    names: RwLock<HashMap<String, String>>,
}

impl KnownIdentities {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let directory = Self::default();
        for name in names {
            directory.insert(name.as_ref());
        }
        directory
    }

    pub fn insert(&self, name: &str) {
        let Some(name) = clean_text(Some(name)) else {
            return;
        };
        // The map stays consistent even if a writer panicked.
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_lowercase(), name);
    }

    pub fn shared(self) -> Arc<dyn IdentityDirectory> {
        Arc::new(self)
    }
}

impl IdentityDirectory for KnownIdentities {
    fn resolve(&self, name: &str) -> Option<String> {
        let key = name.trim().to_lowercase();
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }
}

/// Which statuses end an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionRules {
    pub damaged_is_terminal: bool,
}

impl TransitionRules {
    pub fn is_terminal(self, status: AssignmentStatus) -> bool {
        match status {
            AssignmentStatus::Returned | AssignmentStatus::Lost => true,
            AssignmentStatus::Damaged => self.damaged_is_terminal,
            AssignmentStatus::Active | AssignmentStatus::Overdue => false,
        }
    }

    /// Status changes other than a return. Terminal states accept nothing;
    /// a non-terminal state may be restated to amend notes.
    pub fn can_change(self, from: AssignmentStatus, to: AssignmentStatus) -> bool {
        !self.is_terminal(from) && to != AssignmentStatus::Returned
    }

    pub fn can_return(self, from: AssignmentStatus) -> bool {
        matches!(
            from,
            AssignmentStatus::Active | AssignmentStatus::Overdue | AssignmentStatus::Damaged
        )
    }
}

impl TryFrom<&SqliteRow> for Assignment {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            asset_id: row.try_get("asset_id")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_by: row.try_get("assigned_by")?,
            assignment_date: row.try_get("assignment_date")?,
            expected_return_date: row.try_get("expected_return_date")?,
            actual_return_date: row.try_get("actual_return_date")?,
            status: repo::label(row, "status")?,
            notes: row.try_get("notes")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn load(conn: &mut SqliteConnection, id: &str) -> LedgerResult<Option<Assignment>> {
    let row = repo::get(conn, Table::Assignments, id).await?;
    Ok(row.as_ref().map(Assignment::try_from).transpose()?)
}

pub async fn require(conn: &mut SqliteConnection, id: &str) -> LedgerResult<Assignment> {
    load(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found(Entity::Assignment, id))
}

pub async fn for_asset(
    conn: &mut SqliteConnection,
    asset_id: &str,
) -> LedgerResult<Vec<Assignment>> {
    let rows = repo::find(
        conn,
        Table::Assignments,
        &Filter::new().eq("asset_id", asset_id),
        &[Order::desc("assignment_date"), Order::desc("id")],
        None,
        None,
    )
    .await?;
    Ok(rows
        .iter()
        .map(Assignment::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

fn check_version(current: &Assignment, expected: Option<i64>) -> LedgerResult<()> {
    match expected {
        Some(version) if version != current.version => {
            Err(LedgerError::conflict(Entity::Assignment, &current.id))
        }
        _ => Ok(()),
    }
}

async fn write(
    conn: &mut SqliteConnection,
    seen: &Assignment,
    mut patch: Map<String, Value>,
    now: i64,
) -> LedgerResult<Assignment> {
    patch.insert("updated_at".into(), Value::from(now));
    let filter = Filter::by_id(&seen.id).eq("version", seen.version);
    if repo::update_where(conn, Table::Assignments, &filter, &patch).await? == 0 {
        return Err(LedgerError::conflict(Entity::Assignment, &seen.id));
    }
    require(conn, &seen.id).await
}

pub async fn assign(
    conn: &mut SqliteConnection,
    input: &NewAssignment,
    directory: &dyn IdentityDirectory,
    now: i64,
) -> LedgerResult<Assignment> {
    let asset = assets::require(conn, &input.asset_id).await?;
    if matches!(asset.status, AssetStatus::Retired | AssetStatus::Disposed) {
        return Err(LedgerError::invalid(
            "asset_id",
            format!("asset {} is {}", asset.id, asset.status),
        ));
    }
    let assigned_to = directory
        .resolve(&input.assigned_to)
        .ok_or_else(|| LedgerError::UnknownAssignee(input.assigned_to.trim().to_string()))?;
    let assigned_by = clean_text(Some(&input.assigned_by))
        .ok_or_else(|| LedgerError::missing("assigned_by"))?;
    if let Some(expected) = input.expected_return_date {
        if expected < now {
            return Err(LedgerError::invalid(
                "expected_return_date",
                format!("{expected} precedes assignment_date {now}"),
            ));
        }
    }

    let assignment = Assignment {
        id: new_uuid_v7(),
        asset_id: asset.id,
        assigned_to,
        assigned_by,
        assignment_date: now,
        expected_return_date: input.expected_return_date,
        actual_return_date: None,
        status: AssignmentStatus::Active,
        notes: clean_text(input.notes.as_deref()),
        version: 1,
        created_at: now,
        updated_at: now,
    };

    let mut row = Map::new();
    row.insert("id".into(), Value::from(assignment.id.as_str()));
    row.insert("asset_id".into(), Value::from(assignment.asset_id.as_str()));
    row.insert("assigned_to".into(), Value::from(assignment.assigned_to.as_str()));
    row.insert("assigned_by".into(), Value::from(assignment.assigned_by.as_str()));
    row.insert("assignment_date".into(), Value::from(assignment.assignment_date));
    row.insert(
        "expected_return_date".into(),
        Value::from(assignment.expected_return_date),
    );
    row.insert("actual_return_date".into(), Value::Null);
    row.insert("status".into(), Value::from(assignment.status.as_str()));
    row.insert("notes".into(), Value::from(assignment.notes.clone()));
    row.insert("version".into(), Value::from(assignment.version));
    row.insert("created_at".into(), Value::from(assignment.created_at));
    row.insert("updated_at".into(), Value::from(assignment.updated_at));
    repo::insert(conn, Table::Assignments, &row).await?;

    info!(
        target: "asset_ledger",
        event = "assignment_created",
        assignment_id = %assignment.id,
        asset_id = %assignment.asset_id,
        assigned_to = %assignment.assigned_to
    );
    Ok(assignment)
}

/// Moves an assignment to `cmd.status`. A move to `returned` is a return
/// dated `now`.
pub async fn update_status(
    conn: &mut SqliteConnection,
    cmd: &AssignmentStatusUpdate,
    rules: TransitionRules,
    now: i64,
) -> LedgerResult<Assignment> {
    if cmd.status == AssignmentStatus::Returned {
        let ret = ReturnAssignment {
            assignment_id: cmd.assignment_id.clone(),
            actual_return_date: now,
            notes: cmd.notes.clone(),
            expected_version: cmd.expected_version,
        };
        return return_asset(conn, &ret, rules, now).await;
    }

    let current = require(conn, &cmd.assignment_id).await?;
    check_version(&current, cmd.expected_version)?;
    if !rules.can_change(current.status, cmd.status) {
        return Err(LedgerError::InvalidTransition {
            id: current.id,
            from: current.status,
            to: cmd.status,
        });
    }

    let mut patch = Map::new();
    patch.insert("status".into(), Value::from(cmd.status.as_str()));
    if let Some(notes) = cmd.notes.as_deref() {
        patch.insert("notes".into(), Value::from(clean_text(Some(notes))));
    }
    let updated = write(conn, &current, patch, now).await?;
    info!(
        target: "asset_ledger",
        event = "assignment_status_changed",
        assignment_id = %updated.id,
        from = %current.status,
        to = %updated.status
    );
    Ok(updated)
}

pub async fn return_asset(
    conn: &mut SqliteConnection,
    cmd: &ReturnAssignment,
    rules: TransitionRules,
    now: i64,
) -> LedgerResult<Assignment> {
    let current = require(conn, &cmd.assignment_id).await?;
    check_version(&current, cmd.expected_version)?;
    if !rules.can_return(current.status) {
        return Err(LedgerError::InvalidTransition {
            id: current.id,
            from: current.status,
            to: AssignmentStatus::Returned,
        });
    }
    if cmd.actual_return_date < current.assignment_date {
        return Err(LedgerError::invalid(
            "actual_return_date",
            format!(
                "{} precedes assignment_date {}",
                cmd.actual_return_date, current.assignment_date
            ),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "status".into(),
        Value::from(AssignmentStatus::Returned.as_str()),
    );
    patch.insert(
        "actual_return_date".into(),
        Value::from(cmd.actual_return_date),
    );
    if let Some(notes) = cmd.notes.as_deref() {
        patch.insert("notes".into(), Value::from(clean_text(Some(notes))));
    }
    let updated = write(conn, &current, patch, now).await?;
    info!(
        target: "asset_ledger",
        event = "assignment_returned",
        assignment_id = %updated.id,
        from = %current.status,
        actual_return_date = cmd.actual_return_date
    );
    Ok(updated)
}

/// Flags every active assignment whose expected return is before `as_of`.
pub async fn mark_overdue(
    conn: &mut SqliteConnection,
    as_of: i64,
    now: i64,
) -> LedgerResult<Vec<Assignment>> {
    let rows = repo::find(
        conn,
        Table::Assignments,
        &Filter::new()
            .eq("status", AssignmentStatus::Active.as_str())
            .lt("expected_return_date", as_of),
        &[Order::asc("expected_return_date"), Order::asc("id")],
        None,
        None,
    )
    .await?;
    let due = rows
        .iter()
        .map(Assignment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let mut flagged = Vec::with_capacity(due.len());
    for current in due {
        let mut patch = Map::new();
        patch.insert(
            "status".into(),
            Value::from(AssignmentStatus::Overdue.as_str()),
        );
        flagged.push(write(conn, &current, patch, now).await?);
    }
    if !flagged.is_empty() {
        info!(
            target: "asset_ledger",
            event = "assignments_marked_overdue",
            count = flagged.len(),
            as_of
        );
    }
    Ok(flagged)
}
