#[path = "util.rs"]
mod util;

use anyhow::Result;
use asset_ledger_lib::time::DAY_MS;
use asset_ledger_lib::{
    LedgerConfig, LedgerError, MaintenanceCachePolicy, MaintenanceKind, MaintenancePatch,
    NewMaintenanceRecord,
};
use serde_json::json;

const T2: i64 = 1_760_000_000_000;
const T3: i64 = T2 + 90 * DAY_MS;

fn service(asset_id: &str, performed: i64, next: Option<i64>) -> NewMaintenanceRecord {
    NewMaintenanceRecord {
        asset_id: Some(asset_id.to_string()),
        maintenance_type: Some(MaintenanceKind::Preventive),
        technician_name: Some("T".into()),
        date_performed: Some(performed),
        next_maintenance_date: next,
        ..NewMaintenanceRecord::default()
    }
}

#[tokio::test]
async fn record_then_delete_clears_schedule() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;

    let record = ledger
        .record_maintenance(service(&asset.id, T2, Some(T3)))
        .await?;
    let scheduled = ledger.get_asset(&asset.id).await?;
    assert_eq!(scheduled.next_maintenance_date, Some(T3));
    assert_eq!(scheduled.last_maintenance_date, Some(T2));

    let cleared = ledger.delete_maintenance(&record.id).await?;
    assert_eq!(cleared.next_maintenance_date, None);
    assert_eq!(cleared.last_maintenance_date, None);
    assert!(ledger.maintenance_history(&asset.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_falls_back_to_remaining_most_recent_record() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;

    ledger
        .record_maintenance(service(&asset.id, T2, Some(T2 + 30 * DAY_MS)))
        .await?;
    let latest = ledger
        .record_maintenance(service(&asset.id, T2 + 10 * DAY_MS, Some(T3)))
        .await?;

    let after = ledger.delete_maintenance(&latest.id).await?;
    assert_eq!(after.last_maintenance_date, Some(T2));
    assert_eq!(after.next_maintenance_date, Some(T2 + 30 * DAY_MS));
    Ok(())
}

#[tokio::test]
async fn latest_write_wins_keeps_schedule_on_date_less_record() -> Result<()> {
    let config = LedgerConfig {
        maintenance_cache: MaintenanceCachePolicy::LatestWriteWins,
        ..util::test_config()
    };
    let ledger = util::ledger_with(config).await;
    let asset = util::laptop(&ledger).await;
    ledger
        .record_maintenance(service(&asset.id, T2, Some(T3)))
        .await?;

    let mut repair = service(&asset.id, T2 + DAY_MS, None);
    repair.maintenance_type = Some(MaintenanceKind::Corrective);
    repair.notes = Some("replaced keyboard".into());
    ledger.record_maintenance(repair).await?;

    let asset = ledger.get_asset(&asset.id).await?;
    assert_eq!(asset.next_maintenance_date, Some(T3));
    assert_eq!(ledger.maintenance_history(&asset.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn default_policy_follows_most_recent_record() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;

    ledger
        .record_maintenance(service(&asset.id, T2 + DAY_MS, None))
        .await?;
    // Back-dated entry does not move the cache.
    ledger
        .record_maintenance(service(&asset.id, T2, Some(T3)))
        .await?;

    let asset = ledger.get_asset(&asset.id).await?;
    assert_eq!(asset.last_maintenance_date, Some(T2 + DAY_MS));
    assert_eq!(asset.next_maintenance_date, None);
    assert!(ledger.audit_asset(&asset.id).await?.is_clean());
    Ok(())
}

#[tokio::test]
async fn default_config_writes_leave_no_drift() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;

    ledger
        .record_maintenance(service(&asset.id, T2, None))
        .await?;
    let audit = ledger.audit_asset(&asset.id).await?;
    assert!(audit.is_clean(), "date-less record drifted: {audit:?}");
    assert_eq!(
        ledger.get_asset(&asset.id).await?.last_maintenance_date,
        Some(T2)
    );

    ledger
        .record_maintenance(service(&asset.id, T2 + 10 * DAY_MS, Some(T3)))
        .await?;
    ledger
        .record_maintenance(service(&asset.id, T2 + DAY_MS, Some(T2 + 50 * DAY_MS)))
        .await?;
    let audit = ledger.audit_asset(&asset.id).await?;
    assert!(audit.is_clean(), "back-dated record drifted: {audit:?}");

    let asset = ledger.get_asset(&asset.id).await?;
    assert_eq!(asset.last_maintenance_date, Some(T2 + 10 * DAY_MS));
    assert_eq!(asset.next_maintenance_date, Some(T3));
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_named() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;

    let mut input = service(&asset.id, T2, None);
    input.date_performed = None;
    match ledger.record_maintenance(input).await {
        Err(LedgerError::Validation { field, .. }) => assert_eq!(field, "date_performed"),
        other => panic!("expected validation error: {other:?}"),
    }

    let mut input = service(&asset.id, T2, None);
    input.technician_name = None;
    let err = ledger.record_maintenance(input).await.unwrap_err();
    assert_eq!(err.code(), "LEDGER/VALIDATION");
    assert!(err.to_string().contains("technician_name"));

    assert!(ledger.maintenance_history(&asset.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn form_payload_deserializes_and_records() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;
    let input: NewMaintenanceRecord = serde_json::from_value(json!({
        "assetId": asset.id,
        "maintenanceType": "scheduled",
        "technicianName": "Tess",
        "datePerformed": T2,
        "nextMaintenanceDate": T3,
        "inspection": { "battery_health": 91, "fans_clean": true }
    }))?;

    let record = ledger.record_maintenance(input).await?;
    let stored = ledger.maintenance_history(&asset.id).await?;
    assert_eq!(stored, vec![record.clone()]);
    assert_eq!(record.inspection.get("battery_health"), Some(&json!(91)));
    Ok(())
}

#[tokio::test]
async fn update_moves_schedule_and_keeps_other_fields() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;
    let record = ledger
        .record_maintenance(service(&asset.id, T2, Some(T3)))
        .await?;

    let later = T3 + 30 * DAY_MS;
    let updated = ledger
        .update_maintenance(
            &record.id,
            MaintenancePatch {
                next_maintenance_date: Some(later),
                ..MaintenancePatch::default()
            },
        )
        .await?;
    assert_eq!(updated.technician_name, "T");
    assert_eq!(updated.next_maintenance_date, Some(later));
    assert_eq!(
        ledger.get_asset(&asset.id).await?.next_maintenance_date,
        Some(later)
    );

    let err = ledger
        .update_maintenance(
            &record.id,
            MaintenancePatch {
                next_maintenance_date: Some(T2 - DAY_MS),
                ..MaintenancePatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation {
            field: "next_maintenance_date",
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn unknown_record_or_asset_is_not_found() -> Result<()> {
    let ledger = util::ledger().await;
    assert!(matches!(
        ledger.delete_maintenance("nope").await,
        Err(LedgerError::NotFound { .. })
    ));
    assert!(matches!(
        ledger.record_maintenance(service("nope", T2, None)).await,
        Err(LedgerError::NotFound { .. })
    ));
    Ok(())
}
