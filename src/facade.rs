use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::assets;
use crate::assignment::{self, IdentityDirectory, TransitionRules};
use crate::capabilities;
use crate::config::{LedgerConfig, RedundantTransferPolicy};
use crate::custody;
use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::history;
use crate::id::new_uuid_v7;
use crate::logging::OpScope;
use crate::maintenance;
use crate::models::{
    clean_text, Asset, AssetStatus, AssetStatusUpdate, Assignment, AssignmentStatusUpdate,
    CustodyInterval, CustodyOutcome, Entity, MaintenancePatch, MaintenanceRecord, NewAsset,
    NewAssignment, NewMaintenanceRecord, ReturnAssignment, TransferCustody,
};
use crate::reconcile::{self, AssetAudit, Reconciliation};
use crate::repo::{self, Filter, Table};
use crate::time::now_ms;

/// The entry point callers use. Every write runs in one transaction that
/// either commits whole or rolls back.
#[derive(Clone)]
pub struct LedgerFacade {
    pool: SqlitePool,
    config: Arc<LedgerConfig>,
    directory: Arc<dyn IdentityDirectory>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for LedgerFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerFacade")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl LedgerFacade {
    pub fn new(
        pool: SqlitePool,
        config: LedgerConfig,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        let timeout = config.op_timeout();
        Self {
            pool,
            config: Arc::new(config),
            directory,
            timeout,
        }
    }

    /// Bounds every operation, retries included. An operation that runs out
    /// of time is abandoned and its transaction rolled back.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn rules(&self) -> TransitionRules {
        TransitionRules {
            damaged_is_terminal: self.config.damaged_is_terminal,
        }
    }

    async fn bounded<T, Fut>(&self, op: &'static str, work: Fut) -> LedgerResult<T>
    where
        Fut: std::future::Future<Output = LedgerResult<T>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Cancelled {
                    operation: op,
                    after_ms: millis(limit),
                }),
            },
            None => work.await,
        }
    }

    /// Runs `f` in a transaction. Conflicts are retried with a fresh read when
    /// `retriable` is set, up to the configured limit.
    async fn execute<T, F>(
        &self,
        op: &'static str,
        entity: Entity,
        subject: &str,
        retriable: bool,
        mut f: F,
    ) -> LedgerResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, LedgerResult<T>> + Send,
    {
        let scope = OpScope::new(op, subject);
        let max_retries = self.config.max_conflict_retries;
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                let result = db::run_in_tx(&self.pool, &mut f)
                    .await
                    .map_err(|err: LedgerError| err.classify(entity, subject));
                match result {
                    Err(err) if retriable && err.is_conflict() && attempt < max_retries => {
                        attempt += 1;
                        warn!(
                            target: "asset_ledger",
                            event = "ledger_conflict_retry",
                            op,
                            subject = %subject,
                            attempt
                        );
                        tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                    }
                    other => return other,
                }
            }
        };
        let result = self.bounded(op, attempts).await;
        scope.finish(&result);
        result
    }

    /// Read-only work on a pooled connection, outside any transaction.
    async fn read<T, F>(&self, op: &'static str, f: F) -> LedgerResult<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, LedgerResult<T>>,
    {
        let work = async {
            let mut conn = self.pool.acquire().await?;
            f(&mut *conn).await
        };
        self.bounded(op, work).await
    }

    // ---- assets -------------------------------------------------------------

    pub async fn register_asset(&self, input: NewAsset) -> LedgerResult<Asset> {
        capabilities::validate_attributes(input.equipment_kind, &input.attributes)?;
        let policy = self.config.redundant_transfer;
        let id = new_uuid_v7();
        let subject = id.clone();
        self.execute("register_asset", Entity::Asset, &subject, true, move |conn| {
            let input = input.clone();
            let id = id.clone();
            async move { intake(conn, id, &input, policy).await }.boxed()
        })
        .await
    }

    pub async fn get_asset(&self, asset_id: &str) -> LedgerResult<Asset> {
        let id = asset_id.to_string();
        self.read("get_asset", move |conn| {
            async move { assets::require(conn, &id).await }.boxed()
        })
        .await
    }

    pub async fn list_assets(&self) -> LedgerResult<Vec<Asset>> {
        self.read("list_assets", |conn| async move { assets::list(conn).await }.boxed())
            .await
    }

    /// Sets the operational status. Custody transfers derive
    /// available/in-use on their own; this covers the rest.
    pub async fn set_asset_status(&self, cmd: AssetStatusUpdate) -> LedgerResult<Asset> {
        let retriable = cmd.expected_version.is_none();
        let subject = cmd.asset_id.clone();
        self.execute("set_asset_status", Entity::Asset, &subject, retriable, move |conn| {
            let cmd = cmd.clone();
            async move { set_status(conn, &cmd).await }.boxed()
        })
        .await
    }

    /// Removes an asset together with its custody and maintenance history.
    /// Assets with assignment records are kept, since assignments are never
    /// deleted.
    pub async fn delete_asset(&self, asset_id: &str) -> LedgerResult<()> {
        let id = asset_id.to_string();
        self.execute("delete_asset", Entity::Asset, asset_id, true, move |conn| {
            let id = id.clone();
            async move { delete_cascade(conn, &id).await }.boxed()
        })
        .await
    }

    // ---- custody ------------------------------------------------------------

    pub async fn transfer_custody(&self, cmd: TransferCustody) -> LedgerResult<CustodyOutcome> {
        let policy = self.config.redundant_transfer;
        let retriable = cmd.expected_version.is_none();
        let subject = cmd.asset_id.clone();
        self.execute("transfer_custody", Entity::Asset, &subject, retriable, move |conn| {
            let cmd = cmd.clone();
            async move { custody::transfer(conn, &cmd, policy).await }.boxed()
        })
        .await
    }

    /// Intervals for the asset, newest first.
    pub async fn custody_history(&self, asset_id: &str) -> LedgerResult<Vec<CustodyInterval>> {
        let id = asset_id.to_string();
        self.read("custody_history", move |conn| {
            async move {
                assets::require(conn, &id).await?;
                history::custody_history(conn, &id).await
            }
            .boxed()
        })
        .await
    }

    pub async fn current_custody(&self, asset_id: &str) -> LedgerResult<Option<CustodyInterval>> {
        let id = asset_id.to_string();
        self.read("current_custody", move |conn| {
            async move {
                assets::require(conn, &id).await?;
                history::open_interval(conn, &id).await
            }
            .boxed()
        })
        .await
    }

    // ---- maintenance --------------------------------------------------------

    pub async fn record_maintenance(
        &self,
        input: NewMaintenanceRecord,
    ) -> LedgerResult<MaintenanceRecord> {
        let cache = self.config.maintenance_cache;
        let subject = input.asset_id.clone().unwrap_or_default();
        self.execute("record_maintenance", Entity::Asset, &subject, true, move |conn| {
            let input = input.clone();
            async move { maintenance::record(conn, &input, cache).await }.boxed()
        })
        .await
    }

    pub async fn update_maintenance(
        &self,
        record_id: &str,
        patch: MaintenancePatch,
    ) -> LedgerResult<MaintenanceRecord> {
        let cache = self.config.maintenance_cache;
        let id = record_id.to_string();
        self.execute(
            "update_maintenance",
            Entity::MaintenanceRecord,
            record_id,
            true,
            move |conn| {
                let id = id.clone();
                let patch = patch.clone();
                async move { maintenance::update(conn, &id, &patch, cache).await }.boxed()
            },
        )
        .await
    }

    /// Deletes the record and returns the asset with its recomputed cache.
    pub async fn delete_maintenance(&self, record_id: &str) -> LedgerResult<Asset> {
        let id = record_id.to_string();
        self.execute(
            "delete_maintenance",
            Entity::MaintenanceRecord,
            record_id,
            true,
            move |conn| {
                let id = id.clone();
                async move { maintenance::delete(conn, &id).await }.boxed()
            },
        )
        .await
    }

    pub async fn maintenance_history(&self, asset_id: &str) -> LedgerResult<Vec<MaintenanceRecord>> {
        let id = asset_id.to_string();
        self.read("maintenance_history", move |conn| {
            async move {
                assets::require(conn, &id).await?;
                history::maintenance_history(conn, &id, None).await
            }
            .boxed()
        })
        .await
    }

    // ---- assignments --------------------------------------------------------

    pub async fn assign(&self, input: NewAssignment) -> LedgerResult<Assignment> {
        let directory = Arc::clone(&self.directory);
        let subject = input.asset_id.clone();
        self.execute("assign", Entity::Asset, &subject, true, move |conn| {
            let input = input.clone();
            let directory = Arc::clone(&directory);
            async move { assignment::assign(conn, &input, directory.as_ref(), now_ms()).await }
                .boxed()
        })
        .await
    }

    pub async fn update_assignment_status(
        &self,
        cmd: AssignmentStatusUpdate,
    ) -> LedgerResult<Assignment> {
        let rules = self.rules();
        let retriable = cmd.expected_version.is_none();
        let subject = cmd.assignment_id.clone();
        self.execute(
            "update_assignment_status",
            Entity::Assignment,
            &subject,
            retriable,
            move |conn| {
                let cmd = cmd.clone();
                async move { assignment::update_status(conn, &cmd, rules, now_ms()).await }.boxed()
            },
        )
        .await
    }

    pub async fn return_asset(&self, cmd: ReturnAssignment) -> LedgerResult<Assignment> {
        let rules = self.rules();
        let retriable = cmd.expected_version.is_none();
        let subject = cmd.assignment_id.clone();
        self.execute(
            "return_asset",
            Entity::Assignment,
            &subject,
            retriable,
            move |conn| {
                let cmd = cmd.clone();
                async move { assignment::return_asset(conn, &cmd, rules, now_ms()).await }.boxed()
            },
        )
        .await
    }

    pub async fn get_assignment(&self, assignment_id: &str) -> LedgerResult<Assignment> {
        let id = assignment_id.to_string();
        self.read("get_assignment", move |conn| {
            async move { assignment::require(conn, &id).await }.boxed()
        })
        .await
    }

    pub async fn assignments_for_asset(&self, asset_id: &str) -> LedgerResult<Vec<Assignment>> {
        let id = asset_id.to_string();
        self.read("assignments_for_asset", move |conn| {
            async move {
                assets::require(conn, &id).await?;
                assignment::for_asset(conn, &id).await
            }
            .boxed()
        })
        .await
    }

    /// Flags active assignments whose expected return precedes `as_of`.
    pub async fn mark_overdue(&self, as_of: i64) -> LedgerResult<Vec<Assignment>> {
        self.execute(
            "mark_overdue",
            Entity::Assignment,
            "*",
            true,
            move |conn| async move { assignment::mark_overdue(conn, as_of, now_ms()).await }.boxed(),
        )
        .await
    }

    // ---- reconciliation -----------------------------------------------------

    pub async fn audit_asset(&self, asset_id: &str) -> LedgerResult<AssetAudit> {
        let id = asset_id.to_string();
        self.read("audit_asset", move |conn| {
            async move { reconcile::audit(conn, &id).await }.boxed()
        })
        .await
    }

    pub async fn audit_all(&self) -> LedgerResult<Vec<AssetAudit>> {
        self.read("audit_all", |conn| async move { reconcile::audit_all(conn).await }.boxed())
            .await
    }

    /// Recomputes the asset's projection from its history. This is the
    /// recovery path after a `PartialWrite`.
    pub async fn reconcile_asset(&self, asset_id: &str) -> LedgerResult<Reconciliation> {
        let id = asset_id.to_string();
        self.execute("reconcile_asset", Entity::Asset, asset_id, true, move |conn| {
            let id = id.clone();
            async move { reconcile::reconcile(conn, &id).await }.boxed()
        })
        .await
    }
}

async fn intake(
    conn: &mut SqliteConnection,
    id: String,
    input: &NewAsset,
    policy: RedundantTransferPolicy,
) -> LedgerResult<Asset> {
    let asset_tag = clean_text(input.asset_tag.as_deref());
    if let Some(tag) = &asset_tag {
        let taken = repo::count(conn, Table::Assets, &Filter::new().eq("asset_tag", tag.as_str()))
            .await?;
        if taken > 0 {
            return Err(LedgerError::invalid(
                "asset_tag",
                format!("'{tag}' is already in use"),
            ));
        }
    }

    let initial_holder = clean_text(input.initial_holder.as_deref());
    let status = input.status.unwrap_or(AssetStatus::Available);
    if status == AssetStatus::InUse && initial_holder.is_none() {
        return Err(LedgerError::invalid(
            "status",
            "an asset with no holder cannot be in use",
        ));
    }
    if initial_holder.is_some() && matches!(status, AssetStatus::Retired | AssetStatus::Disposed) {
        return Err(LedgerError::invalid(
            "status",
            format!("a {status} asset cannot have a holder"),
        ));
    }

    let now = now_ms();
    let asset = Asset {
        id,
        equipment_kind: input.equipment_kind,
        model: clean_text(input.model.as_deref()),
        serial_number: clean_text(input.serial_number.as_deref()),
        asset_tag,
        department: clean_text(input.department.as_deref()),
        location: clean_text(input.location.as_deref()),
        current_holder: None,
        status,
        last_maintenance_date: None,
        next_maintenance_date: None,
        attributes: input.attributes.clone(),
        version: 1,
        created_at: now,
        updated_at: now,
    };
    assets::insert(conn, &asset).await?;

    let Some(holder) = initial_holder else {
        return Ok(asset);
    };
    let first = TransferCustody::to_holder(&asset.id, &holder, input.received_at.unwrap_or(now))
        .with_reason("intake");
    let outcome = custody::transfer(conn, &first, policy).await?;
    Ok(outcome.asset)
}

async fn set_status(conn: &mut SqliteConnection, cmd: &AssetStatusUpdate) -> LedgerResult<Asset> {
    let asset = assets::require(conn, &cmd.asset_id).await?;
    assets::check_version(&asset, cmd.expected_version)?;
    match (cmd.status, asset.current_holder.as_deref()) {
        (AssetStatus::InUse, None) => {
            return Err(LedgerError::invalid(
                "status",
                "an asset with no holder cannot be in use",
            ))
        }
        (AssetStatus::Available | AssetStatus::Retired | AssetStatus::Disposed, Some(holder)) => {
            return Err(LedgerError::invalid(
                "status",
                format!("asset is held by {holder}; return it to the pool first"),
            ))
        }
        _ => {}
    }
    assets::write_projection(
        conn,
        &asset,
        assets::ProjectionUpdate {
            status: Some(cmd.status),
            ..assets::ProjectionUpdate::default()
        },
    )
    .await
}

async fn delete_cascade(conn: &mut SqliteConnection, asset_id: &str) -> LedgerResult<()> {
    assets::require(conn, asset_id).await?;
    let loans = repo::count(
        conn,
        Table::Assignments,
        &Filter::new().eq("asset_id", asset_id),
    )
    .await?;
    if loans > 0 {
        return Err(LedgerError::invalid(
            "asset_id",
            format!("asset has {loans} assignment record(s) and cannot be deleted"),
        ));
    }
    let intervals = history::purge_custody(conn, asset_id).await?;
    let records = history::purge_maintenance(conn, asset_id).await?;
    assets::delete(conn, asset_id).await?;
    tracing::info!(
        target: "asset_ledger",
        event = "asset_deleted",
        asset_id = %asset_id,
        custody_intervals = intervals,
        maintenance_records = records
    );
    Ok(())
}
