//! Login flow storage for PostgreSQL.
//!
//! Rows live in `selfservice_login_flows`. Every statement issued on behalf
//! of a request filters on the tenant resolved from its context; only the
//! expiry sweep works across tenants.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use waypoint_auth::AuthResult;
use waypoint_auth::context::{Nid, RequestContext, TenantResolver};
use waypoint_auth::error::AuthError;
use waypoint_auth::flow::{FlowState, InternalContext, LoginFlow};
use waypoint_auth::storage::{DeleteExpiredReport, LoginFlowStorage, SweepBudget};

use crate::{PgPool, StorageError, StorageResult};

type FlowRow = (
    Uuid,
    Uuid,
    String,
    Option<String>,
    Option<String>,
    String,
    bool,
    OffsetDateTime,
    OffsetDateTime,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

fn flow_from_row(row: FlowRow) -> StorageResult<LoginFlow> {
    let (
        id,
        nid,
        request_url,
        return_to,
        active,
        state,
        refresh,
        issued_at,
        expires_at,
        internal_context,
        created_at,
        updated_at,
    ) = row;

    let state: FlowState = state
        .parse()
        .map_err(|e: AuthError| StorageError::Corrupt(format!("login flow {}: {}", id, e)))?;

    Ok(LoginFlow {
        id,
        nid: Nid::from_uuid(nid),
        request_url,
        return_to,
        active,
        state,
        refresh,
        issued_at,
        expires_at,
        internal_context: InternalContext::from_value(internal_context),
        created_at,
        updated_at,
    })
}

/// Truncates to the microsecond precision of `timestamptz`, so a flow reads
/// back equal to what was written.
fn to_micros(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(t.nanosecond() / 1_000 * 1_000)
        .unwrap_or(t)
}

fn not_found(id: Uuid) -> StorageError {
    StorageError::not_found(format!("login flow {}", id))
}

/// PostgreSQL login flow storage.
#[derive(Clone)]
pub struct PostgresLoginFlowStorage {
    pool: PgPool,
    tenants: Arc<dyn TenantResolver>,
}

impl PostgresLoginFlowStorage {
    /// Creates storage over `pool`, resolving tenants with `tenants`.
    #[must_use]
    pub fn new(pool: PgPool, tenants: Arc<dyn TenantResolver>) -> Self {
        Self { pool, tenants }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(&self, flow: &LoginFlow) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO selfservice_login_flows
                (id, nid, request_url, return_to, active_method, state, refresh,
                 issued_at, expires_at, internal_context, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(flow.id)
        .bind(*flow.nid.as_uuid())
        .bind(&flow.request_url)
        .bind(&flow.return_to)
        .bind(&flow.active)
        .bind(flow.state.as_str())
        .bind(flow.refresh)
        .bind(flow.issued_at)
        .bind(flow.expires_at)
        .bind(flow.internal_context.as_value())
        .bind(flow.created_at)
        .bind(flow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let err = StorageError::from(e);
            if err.is_unique_violation() {
                StorageError::conflict(format!("login flow {} already exists", flow.id))
            } else {
                err
            }
        })?;
        Ok(())
    }

    /// Writes every mutable column and returns the persisted `refresh` and
    /// `created_at`, or `None` when no row matches `(id, nid)`.
    async fn update_row(&self, flow: &LoginFlow) -> StorageResult<Option<(bool, OffsetDateTime)>> {
        let row: Option<(bool, OffsetDateTime)> = query_as(
            r#"
            UPDATE selfservice_login_flows
            SET request_url = $3,
                return_to = $4,
                active_method = $5,
                state = $6,
                refresh = refresh OR $7,
                issued_at = $8,
                expires_at = $9,
                internal_context = $10,
                updated_at = $11
            WHERE id = $1 AND nid = $2
            RETURNING refresh, created_at
            "#,
        )
        .bind(flow.id)
        .bind(*flow.nid.as_uuid())
        .bind(&flow.request_url)
        .bind(&flow.return_to)
        .bind(&flow.active)
        .bind(flow.state.as_str())
        .bind(flow.refresh)
        .bind(flow.issued_at)
        .bind(flow.expires_at)
        .bind(flow.internal_context.as_value())
        .bind(flow.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn select(&self, nid: Nid, id: Uuid) -> StorageResult<LoginFlow> {
        let row: Option<FlowRow> = query_as(
            r#"
            SELECT id, nid, request_url, return_to, active_method, state, refresh,
                   issued_at, expires_at, internal_context, created_at, updated_at
            FROM selfservice_login_flows
            WHERE id = $1 AND nid = $2
            "#,
        )
        .bind(id)
        .bind(*nid.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(flow_from_row).unwrap_or_else(|| Err(not_found(id)))
    }

    /// Locks the row, then sets `refresh` if it is not already set.
    async fn force(&self, nid: Nid, id: Uuid) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;

        let refresh: Option<bool> = query_scalar(
            r#"
            SELECT refresh FROM selfservice_login_flows
            WHERE id = $1 AND nid = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(*nid.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match refresh {
            None => return Err(not_found(id)),
            Some(true) => {}
            Some(false) => {
                query(
                    r#"
                    UPDATE selfservice_login_flows
                    SET refresh = TRUE, updated_at = $3
                    WHERE id = $1 AND nid = $2
                    "#,
                )
                .bind(id)
                .bind(*nid.as_uuid())
                .bind(to_micros(OffsetDateTime::now_utc()))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// One sweep pass. Rows locked by a concurrent sweeper are skipped.
    async fn delete_pass(&self, cutoff: OffsetDateTime, requested: u64) -> StorageResult<u64> {
        let limit = i64::try_from(requested).unwrap_or(i64::MAX);
        let result = query(
            r#"
            DELETE FROM selfservice_login_flows
            WHERE id IN (
                SELECT id FROM selfservice_login_flows
                WHERE expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored flows across all tenants.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> StorageResult<i64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM selfservice_login_flows")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl LoginFlowStorage for PostgresLoginFlowStorage {
    #[instrument(skip_all, fields(flow_id = %flow.id))]
    async fn create(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        let now = to_micros(OffsetDateTime::now_utc());

        flow.nid = nid;
        flow.issued_at = to_micros(flow.issued_at);
        flow.expires_at = to_micros(flow.expires_at);
        flow.created_at = now;
        flow.updated_at = now;
        flow.ensure_internal_context();

        ctx.run(async { self.insert(&*flow).await.map_err(AuthError::from) })
            .await?;
        debug!(%nid, "login flow created");
        Ok(())
    }

    #[instrument(skip_all, fields(flow_id = %flow.id))]
    async fn update(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;

        flow.nid = nid;
        flow.issued_at = to_micros(flow.issued_at);
        flow.expires_at = to_micros(flow.expires_at);
        flow.updated_at = to_micros(OffsetDateTime::now_utc());
        flow.ensure_internal_context();

        let (refresh, created_at) = ctx
            .run(async {
                self.update_row(&*flow)
                    .await
                    .map_err(AuthError::from)?
                    .ok_or_else(|| not_found(flow.id).into())
            })
            .await?;

        flow.refresh = refresh;
        flow.created_at = created_at;
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn find_by_id(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<LoginFlow> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async { self.select(nid, id).await.map_err(AuthError::from) })
            .await
    }

    #[instrument(skip(self, ctx))]
    async fn force_refresh(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async { self.force(nid, id).await.map_err(AuthError::from) })
            .await?;
        info!(%nid, "login flow forced to re-authenticate");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn delete_expired(
        &self,
        ctx: &RequestContext,
        cutoff: OffsetDateTime,
        limit: u64,
        batch_size: u64,
    ) -> AuthResult<DeleteExpiredReport> {
        let mut budget = SweepBudget::new(limit, batch_size)?;

        while let Some(requested) = budget.next_pass() {
            let deleted = ctx
                .run(async {
                    self.delete_pass(cutoff, requested)
                        .await
                        .map_err(AuthError::from)
                })
                .await?;
            debug!(requested, deleted, "expiry sweep pass finished");
            budget.record(requested, deleted);
        }

        let report = budget.finish();
        info!(
            deleted = report.deleted,
            passes = report.pass_count(),
            "expired login flows deleted"
        );
        Ok(report)
    }
}
