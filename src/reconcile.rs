//! Detects and repairs drift between an asset's projected fields and the
//! history logs they are derived from.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};
use ts_rs::TS;

use crate::assets::{self, ProjectionUpdate};
use crate::custody;
use crate::error::LedgerResult;
use crate::history;
use crate::models::{Asset, CustodyInterval};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum Drift {
    MultipleOpenIntervals {
        interval_ids: Vec<String>,
    },
    HolderMismatch {
        cached: Option<String>,
        expected: Option<String>,
    },
    LastMaintenanceMismatch {
        #[ts(type = "number | null")]
        cached: Option<i64>,
        #[ts(type = "number | null")]
        expected: Option<i64>,
    },
    NextMaintenanceMismatch {
        #[ts(type = "number | null")]
        cached: Option<i64>,
        #[ts(type = "number | null")]
        expected: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct AssetAudit {
    pub asset_id: String,
    pub drift: Vec<Drift>,
}

impl AssetAudit {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }
}

struct Expected {
    open: Vec<CustodyInterval>,
    holder: Option<String>,
    last_maintenance: Option<i64>,
    next_maintenance: Option<i64>,
}

async fn expected_state(conn: &mut SqliteConnection, asset: &Asset) -> LedgerResult<Expected> {
    let open = history::open_intervals(conn, &asset.id).await?;
    let top = history::most_recent_maintenance(conn, &asset.id).await?;
    Ok(Expected {
        holder: open.first().and_then(|i| i.holder.clone()),
        open,
        last_maintenance: top.as_ref().map(|r| r.date_performed),
        next_maintenance: top.and_then(|r| r.next_maintenance_date),
    })
}

fn compare(asset: &Asset, expected: &Expected) -> Vec<Drift> {
    let mut drift = Vec::new();
    if expected.open.len() > 1 {
        drift.push(Drift::MultipleOpenIntervals {
            interval_ids: expected.open.iter().map(|i| i.id.clone()).collect(),
        });
    }
    if asset.current_holder != expected.holder {
        drift.push(Drift::HolderMismatch {
            cached: asset.current_holder.clone(),
            expected: expected.holder.clone(),
        });
    }
    if asset.last_maintenance_date != expected.last_maintenance {
        drift.push(Drift::LastMaintenanceMismatch {
            cached: asset.last_maintenance_date,
            expected: expected.last_maintenance,
        });
    }
    if asset.next_maintenance_date != expected.next_maintenance {
        drift.push(Drift::NextMaintenanceMismatch {
            cached: asset.next_maintenance_date,
            expected: expected.next_maintenance,
        });
    }
    drift
}

pub async fn audit(conn: &mut SqliteConnection, asset_id: &str) -> LedgerResult<AssetAudit> {
    let asset = assets::require(conn, asset_id).await?;
    let expected = expected_state(conn, &asset).await?;
    Ok(AssetAudit {
        asset_id: asset.id.clone(),
        drift: compare(&asset, &expected),
    })
}

pub async fn audit_all(conn: &mut SqliteConnection) -> LedgerResult<Vec<AssetAudit>> {
    let mut audits = Vec::new();
    for asset in assets::list(conn).await? {
        let expected = expected_state(conn, &asset).await?;
        audits.push(AssetAudit {
            drift: compare(&asset, &expected),
            asset_id: asset.id,
        });
    }
    Ok(audits)
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Reconciliation {
    /// Drift found before repairs.
    pub audit: AssetAudit,
    pub asset: Asset,
}

/// Rewrites the asset's projection from the logs. Surplus open intervals are
/// closed at the start of the newest one, which is kept.
pub async fn reconcile(conn: &mut SqliteConnection, asset_id: &str) -> LedgerResult<Reconciliation> {
    let asset = assets::require(conn, asset_id).await?;
    let expected = expected_state(conn, &asset).await?;
    let drift = compare(&asset, &expected);
    let audit = AssetAudit {
        asset_id: asset.id.clone(),
        drift,
    };
    if audit.is_clean() {
        return Ok(Reconciliation { audit, asset });
    }

    if let Some((keep, surplus)) = expected.open.split_first() {
        for interval in surplus {
            history::close_interval(conn, &interval.id, keep.from.max(interval.from)).await?;
            warn!(
                target: "asset_ledger",
                event = "custody_interval_force_closed",
                asset_id = %asset.id,
                interval_id = %interval.id,
                kept_interval = %keep.id
            );
        }
    }

    let status = custody::derived_status(asset.status, expected.holder.as_deref());
    let repaired = assets::write_projection(
        conn,
        &asset,
        ProjectionUpdate {
            current_holder: Some(expected.holder.clone()),
            department: None,
            status: Some(status),
            last_maintenance_date: Some(expected.last_maintenance),
            next_maintenance_date: Some(expected.next_maintenance),
        },
    )
    .await?;

    info!(
        target: "asset_ledger",
        event = "asset_reconciled",
        asset_id = %repaired.id,
        repairs = audit.drift.len()
    );
    Ok(Reconciliation {
        audit,
        asset: repaired,
    })
}
