use std::sync::Arc;

use anyhow::Context;

pub mod assets;
pub mod assignment;
pub mod capabilities;
pub mod config;
pub mod custody;
pub mod db;
pub mod error;
pub mod facade;
pub mod history;
pub mod id;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod repo;
pub mod time;

pub use assignment::{IdentityDirectory, KnownIdentities, TransitionRules};
pub use config::{LedgerConfig, MaintenanceCachePolicy, RedundantTransferPolicy};
pub use error::{AppError, AppResult, LedgerError, LedgerResult};
pub use facade::LedgerFacade;
pub use models::{
    Asset, AssetStatus, AssetStatusUpdate, Assignment, AssignmentStatus, AssignmentStatusUpdate,
    CustodyInterval, CustodyOutcome, Entity, EquipmentKind, MaintenanceKind, MaintenancePatch,
    MaintenanceRecord, NewAsset, NewAssignment, NewMaintenanceRecord, ReturnAssignment,
    TransferCustody,
};
pub use reconcile::{AssetAudit, Drift, Reconciliation};

/// Opens the configured database, brings its schema up to date and returns a
/// ready facade.
pub async fn open_ledger(
    config: LedgerConfig,
    directory: Arc<dyn IdentityDirectory>,
) -> anyhow::Result<LedgerFacade> {
    let pool = db::open_sqlite_pool(&config).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply ledger migrations")?;
    Ok(LedgerFacade::new(pool, config, directory))
}
