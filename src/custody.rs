use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info};

use crate::assets::{self, ProjectionUpdate};
use crate::config::RedundantTransferPolicy;
use crate::error::{LedgerError, LedgerResult};
use crate::history;
use crate::id::new_uuid_v7;
use crate::models::{
    clean_text, Asset, AssetStatus, CustodyInterval, CustodyOutcome, Entity, TransferCustody,
};
use crate::time::now_ms;

fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Status that follows from a holder change. Statuses set by hand (repair,
/// retirement) are left alone.
pub(crate) fn derived_status(current: AssetStatus, holder: Option<&str>) -> AssetStatus {
    match (current, holder) {
        (AssetStatus::Available, Some(_)) => AssetStatus::InUse,
        (AssetStatus::InUse, None) => AssetStatus::Available,
        (status, _) => status,
    }
}

/// Rejects a transfer dated before the interval it would close, or before the
/// end of the last closed interval when nothing is open.
fn check_order(
    occurred_at: i64,
    open: Option<&CustodyInterval>,
    last_closed: Option<&CustodyInterval>,
) -> LedgerResult<()> {
    if let Some(open) = open {
        if occurred_at < open.from {
            return Err(LedgerError::InvalidIntervalOrder {
                interval_id: open.id.clone(),
                bound: open.from,
                requested: occurred_at,
            });
        }
        return Ok(());
    }
    if let Some(closed) = last_closed {
        let end = closed.to.unwrap_or(closed.from);
        if occurred_at < end {
            return Err(LedgerError::InvalidIntervalOrder {
                interval_id: closed.id.clone(),
                bound: end,
                requested: occurred_at,
            });
        }
    }
    Ok(())
}

/// Moves custody of an asset: closes the open interval (if any) at
/// `occurred_at`, opens one for the new holder (if any), and rewrites the
/// asset's holder, department and status. Must run inside a transaction.
pub async fn transfer(
    conn: &mut SqliteConnection,
    cmd: &TransferCustody,
    policy: RedundantTransferPolicy,
) -> LedgerResult<CustodyOutcome> {
    let asset = assets::require(conn, &cmd.asset_id).await?;
    assets::check_version(&asset, cmd.expected_version)?;

    let holder = clean_text(cmd.new_holder.as_deref());
    let department = clean_text(cmd.department.as_deref()).or_else(|| asset.department.clone());
    let reason = clean_text(cmd.reason.as_deref());
    if holder.is_some() && matches!(asset.status, AssetStatus::Retired | AssetStatus::Disposed) {
        return Err(LedgerError::invalid(
            "asset_id",
            format!("asset {} is {} and cannot be handed out", asset.id, asset.status),
        ));
    }

    let open = history::open_interval(conn, &asset.id).await?;
    let last_closed = match open {
        Some(_) => None,
        None => history::latest_closed_interval(conn, &asset.id).await?,
    };
    check_order(cmd.occurred_at, open.as_ref(), last_closed.as_ref())?;

    let department_changed = !same_text(department.as_deref(), asset.department.as_deref());
    match &open {
        None if holder.is_none() => {
            if !department_changed {
                return Err(LedgerError::NoChange { asset_id: asset.id });
            }
            // Pooled asset moving between departments: no custody to record.
            let asset = assets::write_projection(
                conn,
                &asset,
                ProjectionUpdate {
                    department: Some(department),
                    ..ProjectionUpdate::default()
                },
            )
            .await?;
            return Ok(CustodyOutcome {
                asset,
                closed: None,
                opened: None,
            });
        }
        Some(current) if same_text(current.holder.as_deref(), holder.as_deref()) => {
            let meaningful = !same_text(current.department.as_deref(), department.as_deref())
                || (reason.is_some() && !same_text(current.reason.as_deref(), reason.as_deref()));
            if !meaningful && policy == RedundantTransferPolicy::Reject {
                debug!(
                    target: "asset_ledger",
                    event = "custody_transfer_redundant",
                    asset_id = %asset.id,
                    interval_id = %current.id
                );
                return Err(LedgerError::NoChange { asset_id: asset.id });
            }
        }
        _ => {}
    }

    let closed = match open {
        Some(mut current) => {
            if !history::close_interval(conn, &current.id, cmd.occurred_at).await? {
                return Err(LedgerError::conflict(Entity::CustodyInterval, current.id));
            }
            current.to = Some(cmd.occurred_at);
            Some(current)
        }
        None => None,
    };

    let opened = match &holder {
        Some(name) => {
            let interval = CustodyInterval {
                id: new_uuid_v7(),
                asset_id: asset.id.clone(),
                holder: Some(name.clone()),
                department: department.clone(),
                from: cmd.occurred_at,
                to: None,
                reason: reason.clone(),
                created_at: now_ms(),
            };
            history::append_interval(conn, &interval).await?;
            Some(interval)
        }
        None => None,
    };

    let status = derived_status(asset.status, holder.as_deref());
    let updated = assets::write_projection(
        conn,
        &asset,
        ProjectionUpdate {
            current_holder: Some(holder.clone()),
            department: Some(department),
            status: Some(status),
            ..ProjectionUpdate::default()
        },
    )
    .await?;

    verify(conn, &updated, "transfer_custody").await?;

    info!(
        target: "asset_ledger",
        event = "custody_transferred",
        asset_id = %updated.id,
        closed_interval = ?closed.as_ref().map(|c| c.id.as_str()),
        opened_interval = ?opened.as_ref().map(|o| o.id.as_str()),
        holder = ?updated.current_holder,
        occurred_at = cmd.occurred_at
    );

    Ok(CustodyOutcome {
        asset: updated,
        closed,
        opened,
    })
}

/// Confirms, inside the running transaction, that the asset has at most one
/// open interval and that its holder cache agrees with it.
pub(crate) async fn verify(
    conn: &mut SqliteConnection,
    asset: &Asset,
    operation: &'static str,
) -> LedgerResult<()> {
    let open = history::open_intervals(conn, &asset.id).await?;
    if open.len() > 1 {
        return Err(LedgerError::PartialWrite {
            operation,
            entity: Entity::Asset,
            id: asset.id.clone(),
            detail: format!("{} open custody intervals", open.len()),
        });
    }
    let open_holder = open.first().and_then(|i| i.holder.as_deref());
    if open_holder != asset.current_holder.as_deref() {
        return Err(LedgerError::PartialWrite {
            operation,
            entity: Entity::Asset,
            id: asset.id.clone(),
            detail: format!(
                "holder cache {:?} disagrees with open interval {:?}",
                asset.current_holder, open_holder
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(from: i64, to: Option<i64>) -> CustodyInterval {
        CustodyInterval {
            id: "i1".into(),
            asset_id: "a1".into(),
            holder: Some("Alice".into()),
            department: None,
            from,
            to,
            reason: None,
            created_at: 0,
        }
    }

    #[test]
    fn transfer_before_open_interval_is_rejected() {
        let open = interval(100, None);
        let err = check_order(99, Some(&open), None).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidIntervalOrder {
                bound: 100,
                requested: 99,
                ..
            }
        ));
        assert!(check_order(100, Some(&open), None).is_ok());
    }

    #[test]
    fn transfer_before_last_closed_end_is_rejected() {
        let closed = interval(10, Some(50));
        assert!(check_order(49, None, Some(&closed)).is_err());
        assert!(check_order(50, None, Some(&closed)).is_ok());
        assert!(check_order(0, None, None).is_ok());
    }

    #[test]
    fn holder_comparison_ignores_case_and_padding() {
        assert!(same_text(Some(" Alice"), Some("alice ")));
        assert!(same_text(None, None));
        assert!(!same_text(Some("Alice"), None));
    }

    #[test]
    fn status_follows_holder_only_between_available_and_in_use() {
        assert_eq!(
            derived_status(AssetStatus::Available, Some("Bob")),
            AssetStatus::InUse
        );
        assert_eq!(derived_status(AssetStatus::InUse, None), AssetStatus::Available);
        assert_eq!(
            derived_status(AssetStatus::InRepair, Some("Bob")),
            AssetStatus::InRepair
        );
    }
}
