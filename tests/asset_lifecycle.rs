#[path = "util.rs"]
mod util;

use anyhow::Result;
use asset_ledger_lib::time::now_ms;
use asset_ledger_lib::{
    AssetStatus, AssetStatusUpdate, Drift, EquipmentKind, LedgerError, MaintenanceKind,
    NewAsset, NewAssignment, NewMaintenanceRecord, TransferCustody,
};
use serde_json::json;

const T0: i64 = 1_760_000_000_000;

fn status(asset_id: &str, status: AssetStatus) -> AssetStatusUpdate {
    AssetStatusUpdate {
        asset_id: asset_id.to_string(),
        status,
        expected_version: None,
    }
}

#[tokio::test]
async fn register_validates_attributes_for_kind() -> Result<()> {
    let ledger = util::ledger().await;

    let mut server = NewAsset::new(EquipmentKind::Server);
    server.attributes = json!({ "rack_location": "B4", "ram_gb": 256, "vendor": "Dell" })
        .as_object()
        .cloned()
        .unwrap_or_default();
    let asset = ledger.register_asset(server).await?;
    assert_eq!(asset.attributes.get("rack_location"), Some(&json!("B4")));
    assert_eq!(ledger.get_asset(&asset.id).await?, asset);

    let mut monitor = NewAsset::new(EquipmentKind::Monitor);
    monitor.attributes.insert("ram_gb".into(), json!(16));
    let err = ledger.register_asset(monitor).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation { field: "attributes", .. }));

    assert_eq!(ledger.list_assets().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn asset_tags_are_unique() -> Result<()> {
    let ledger = util::ledger().await;
    let mut first = NewAsset::new(EquipmentKind::Laptop);
    first.asset_tag = Some("LT-001".into());
    ledger.register_asset(first.clone()).await?;

    let err = ledger.register_asset(first).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation { field: "asset_tag", .. }));
    Ok(())
}

#[tokio::test]
async fn in_use_requires_a_holder() -> Result<()> {
    let ledger = util::ledger().await;
    let mut input = NewAsset::new(EquipmentKind::Tablet);
    input.status = Some(AssetStatus::InUse);
    assert!(matches!(
        ledger.register_asset(input).await,
        Err(LedgerError::Validation { field: "status", .. })
    ));

    let asset = util::laptop(&ledger).await;
    assert!(matches!(
        ledger.set_asset_status(status(&asset.id, AssetStatus::InUse)).await,
        Err(LedgerError::Validation { field: "status", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn held_asset_cannot_be_retired() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;
    ledger
        .transfer_custody(TransferCustody::to_holder(&asset.id, "Alice", T0))
        .await?;
    assert!(ledger
        .set_asset_status(status(&asset.id, AssetStatus::Retired))
        .await
        .is_err());

    let repair = ledger
        .set_asset_status(status(&asset.id, AssetStatus::InRepair))
        .await?;
    assert_eq!(repair.status, AssetStatus::InRepair);
    assert_eq!(repair.current_holder.as_deref(), Some("Alice"));

    ledger
        .transfer_custody(TransferCustody::to_pool(&asset.id, T0 + 1))
        .await?;
    let retired = ledger
        .set_asset_status(status(&asset.id, AssetStatus::Retired))
        .await?;
    assert_eq!(retired.status, AssetStatus::Retired);
    Ok(())
}

#[tokio::test]
async fn delete_removes_history_but_not_loaned_assets() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;
    ledger
        .transfer_custody(TransferCustody::to_holder(&asset.id, "Alice", T0))
        .await?;
    ledger
        .record_maintenance(NewMaintenanceRecord {
            asset_id: Some(asset.id.clone()),
            maintenance_type: Some(MaintenanceKind::Emergency),
            technician_name: Some("Tess".into()),
            date_performed: Some(T0),
            ..NewMaintenanceRecord::default()
        })
        .await?;

    ledger.delete_asset(&asset.id).await?;
    assert!(matches!(
        ledger.get_asset(&asset.id).await,
        Err(LedgerError::NotFound { .. })
    ));
    let leftovers: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM custody_intervals) + (SELECT COUNT(*) FROM maintenance_records)",
    )
    .fetch_one(ledger.pool())
    .await?;
    assert_eq!(leftovers, 0);

    let loaned = util::laptop(&ledger).await;
    ledger
        .assign(NewAssignment {
            asset_id: loaned.id.clone(),
            assigned_to: "Bob".into(),
            assigned_by: "Dave".into(),
            expected_return_date: Some(now_ms() + 86_400_000),
            notes: None,
        })
        .await?;
    let err = ledger.delete_asset(&loaned.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation { field: "asset_id", .. }));
    assert!(ledger.get_asset(&loaned.id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn reconcile_repairs_tampered_projection() -> Result<()> {
    let ledger = util::ledger().await;
    let asset = util::laptop(&ledger).await;
    ledger
        .transfer_custody(TransferCustody::to_holder(&asset.id, "Alice", T0))
        .await?;
    assert!(ledger.audit_asset(&asset.id).await?.is_clean());

    sqlx::query("UPDATE assets SET current_holder = 'Mallory', next_maintenance_date = 5 WHERE id = ?")
        .bind(&asset.id)
        .execute(ledger.pool())
        .await?;

    let audit = ledger.audit_asset(&asset.id).await?;
    assert!(audit.drift.contains(&Drift::HolderMismatch {
        cached: Some("Mallory".into()),
        expected: Some("Alice".into()),
    }));
    assert!(audit.drift.contains(&Drift::NextMaintenanceMismatch {
        cached: Some(5),
        expected: None,
    }));
    assert_eq!(ledger.audit_all().await?.len(), 1);

    let repaired = ledger.reconcile_asset(&asset.id).await?;
    assert_eq!(repaired.audit, audit);
    assert_eq!(repaired.asset.current_holder.as_deref(), Some("Alice"));
    assert_eq!(repaired.asset.next_maintenance_date, None);
    assert!(ledger.audit_asset(&asset.id).await?.is_clean());
    Ok(())
}
