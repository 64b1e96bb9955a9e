use sqlx::error::{DatabaseError, ErrorKind};
use thiserror::Error;

use crate::models::{AssignmentStatus, Entity};

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Everything a ledger operation can fail with. Business-rule variants are
/// never retried; `ConcurrentModification` may be.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("custody interval {interval_id} is bounded at {bound}; cannot transfer at {requested}")]
    InvalidIntervalOrder {
        interval_id: String,
        bound: i64,
        requested: i64,
    },
    #[error("assignment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AssignmentStatus,
        to: AssignmentStatus,
    },
    #[error("assignee '{0}' is not a known identity")]
    UnknownAssignee(String),
    #[error("transfer for asset {asset_id} changes neither holder, department nor reason")]
    NoChange { asset_id: String },
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: Entity, id: String },
    #[error("{operation} left {entity} {id} inconsistent: {detail}")]
    PartialWrite {
        operation: &'static str,
        entity: Entity,
        id: String,
        detail: String,
    },
    #[error("{operation} cancelled after {after_ms} ms")]
    Cancelled { operation: &'static str, after_ms: u64 },
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        LedgerError::Validation {
            field,
            reason: "is required".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn conflict(entity: Entity, id: impl Into<String>) -> Self {
        LedgerError::ConcurrentModification {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for the UI collaborator.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "LEDGER/NOT_FOUND",
            LedgerError::Validation { .. } => "LEDGER/VALIDATION",
            LedgerError::InvalidIntervalOrder { .. } => "LEDGER/INVALID_INTERVAL_ORDER",
            LedgerError::InvalidTransition { .. } => "LEDGER/INVALID_TRANSITION",
            LedgerError::UnknownAssignee(_) => "LEDGER/UNKNOWN_ASSIGNEE",
            LedgerError::NoChange { .. } => "LEDGER/NO_CHANGE",
            LedgerError::ConcurrentModification { .. } => "LEDGER/CONCURRENT_MODIFICATION",
            LedgerError::PartialWrite { .. } => "LEDGER/PARTIAL_WRITE",
            LedgerError::Cancelled { .. } => "LEDGER/CANCELLED",
            LedgerError::Store(_) => "LEDGER/STORE",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification { .. })
    }

    /// Reclassifies lock contention reported by SQLite as a concurrency
    /// conflict on `entity`/`id`, and a taken asset tag as a validation error.
    /// Every other error is returned unchanged.
    pub fn classify(self, entity: Entity, id: &str) -> Self {
        match self {
            LedgerError::Store(sqlx::Error::Database(db)) if is_write_conflict(&*db) => {
                LedgerError::conflict(entity, id)
            }
            LedgerError::Store(sqlx::Error::Database(db)) if is_duplicate_tag(&*db) => {
                LedgerError::invalid("asset_tag", "already in use")
            }
            other => other,
        }
    }
}

// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
const LOCK_CODES: &[&str] = &["5", "6", "261", "262", "517"];

fn is_write_conflict(db: &dyn DatabaseError) -> bool {
    if db
        .code()
        .map(|code| LOCK_CODES.iter().any(|known| code == *known))
        .unwrap_or(false)
    {
        return true;
    }
    matches!(db.kind(), ErrorKind::UniqueViolation)
        && db.message().contains("custody_intervals.asset_id")
}

fn is_duplicate_tag(db: &dyn DatabaseError) -> bool {
    matches!(db.kind(), ErrorKind::UniqueViolation) && db.message().contains("assets.asset_tag")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            LedgerError::not_found(Entity::Asset, "a"),
            LedgerError::missing("asset_id"),
            LedgerError::InvalidIntervalOrder {
                interval_id: "i".into(),
                bound: 2,
                requested: 1,
            },
            LedgerError::InvalidTransition {
                id: "x".into(),
                from: AssignmentStatus::Lost,
                to: AssignmentStatus::Returned,
            },
            LedgerError::UnknownAssignee("nobody".into()),
            LedgerError::NoChange {
                asset_id: "a".into(),
            },
            LedgerError::conflict(Entity::Asset, "a"),
            LedgerError::Cancelled {
                operation: "op",
                after_ms: 5,
            },
            LedgerError::Store(sqlx::Error::RowNotFound),
        ];
        let mut codes: Vec<_> = errors.iter().map(LedgerError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn validation_message_names_field() {
        let err = LedgerError::missing("technician_name");
        assert_eq!(err.to_string(), "invalid technician_name: is required");
    }

    #[test]
    fn classify_leaves_other_store_errors_untouched() {
        let err = LedgerError::Store(sqlx::Error::RowNotFound).classify(Entity::Asset, "a");
        assert!(matches!(err, LedgerError::Store(sqlx::Error::RowNotFound)));
        let err = LedgerError::missing("asset_id").classify(Entity::Asset, "a");
        assert!(matches!(err, LedgerError::Validation { .. }));
    }
}
