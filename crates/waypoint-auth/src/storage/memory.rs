//! In-memory login flow storage.
//!
//! Keeps every flow in one map behind a `tokio` read-write lock. Suitable for
//! tests and single-process deployments; flows do not survive a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{DeleteExpiredReport, LoginFlowStorage, SweepBudget};
use crate::AuthResult;
use crate::context::{RequestContext, TenantResolver};
use crate::error::AuthError;
use crate::flow::LoginFlow;

/// In-memory [`LoginFlowStorage`].
pub struct InMemoryLoginFlowStorage {
    flows: RwLock<HashMap<Uuid, LoginFlow>>,
    tenants: Arc<dyn TenantResolver>,
}

impl InMemoryLoginFlowStorage {
    /// Creates an empty store that resolves tenants through `tenants`.
    #[must_use]
    pub fn new(tenants: Arc<dyn TenantResolver>) -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            tenants,
        }
    }

    /// Number of stored flows across all tenants.
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    /// Returns `true` if no flows are stored.
    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }
}

fn not_found(id: Uuid) -> AuthError {
    AuthError::not_found(format!("Login flow {}", id))
}

#[async_trait]
impl LoginFlowStorage for InMemoryLoginFlowStorage {
    #[instrument(skip(self, ctx, flow), fields(flow_id = %flow.id))]
    async fn create(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async {
            let mut flows = self.flows.write().await;
            if flows.contains_key(&flow.id) {
                return Err(AuthError::conflict(format!(
                    "Login flow {} already exists",
                    flow.id
                )));
            }

            let now = OffsetDateTime::now_utc();
            flow.nid = nid;
            flow.ensure_internal_context();
            flow.created_at = now;
            flow.updated_at = now;
            flows.insert(flow.id, flow.clone());
            debug!(%nid, "login flow created");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, ctx, flow), fields(flow_id = %flow.id))]
    async fn update(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async {
            let mut flows = self.flows.write().await;
            let stored = flows
                .get_mut(&flow.id)
                .filter(|stored| stored.nid == nid)
                .ok_or_else(|| not_found(flow.id))?;

            flow.nid = nid;
            flow.ensure_internal_context();
            flow.refresh |= stored.refresh;
            flow.created_at = stored.created_at;
            flow.updated_at = OffsetDateTime::now_utc();
            *stored = flow.clone();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, ctx))]
    async fn find_by_id(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<LoginFlow> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async {
            self.flows
                .read()
                .await
                .get(&id)
                .filter(|flow| flow.nid == nid)
                .cloned()
                .ok_or_else(|| not_found(id))
        })
        .await
    }

    #[instrument(skip(self, ctx))]
    async fn force_refresh(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<()> {
        let nid = self.tenants.resolve_tenant(ctx)?;
        ctx.run(async {
            // Write lock held across the read-modify-write.
            let mut flows = self.flows.write().await;
            let flow = flows
                .get_mut(&id)
                .filter(|flow| flow.nid == nid)
                .ok_or_else(|| not_found(id))?;
            if !flow.refresh {
                flow.refresh = true;
                flow.updated_at = OffsetDateTime::now_utc();
            }
            info!(%nid, "login flow forced to re-authenticate");
            Ok(())
        })
        .await
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
        ctx.run(async {
            while let Some(requested) = budget.next_pass() {
                let mut flows = self.flows.write().await;
                let mut expired: Vec<(OffsetDateTime, Uuid)> = flows
                    .values()
                    .filter(|flow| flow.expires_at <= cutoff)
                    .map(|flow| (flow.expires_at, flow.id))
                    .collect();
                expired.sort_unstable();

                let take = usize::try_from(requested).unwrap_or(usize::MAX);
                let mut deleted = 0u64;
                for (_, id) in expired.into_iter().take(take) {
                    flows.remove(&id);
                    deleted += 1;
                }
                drop(flows);

                debug!(requested, deleted, "expiry sweep pass finished");
                budget.record(requested, deleted);
            }
            Ok(())
        })
        .await?;

        let report = budget.finish();
        info!(
            deleted = report.deleted,
            passes = report.pass_count(),
            "expired login flows deleted"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::{ContextualTenant, Nid};

    fn storage() -> InMemoryLoginFlowStorage {
        InMemoryLoginFlowStorage::new(Arc::new(ContextualTenant::strict()))
    }

    #[tokio::test]
    async fn test_create_assigns_tenant_from_context() {
        let store = storage();
        let nid = Nid::new();
        let ctx = RequestContext::for_tenant(nid);

        let mut flow = LoginFlow::new(Duration::from_secs(600), "/self-service/login");
        flow.nid = Nid::new();
        store.create(&ctx, &mut flow).await.unwrap();

        assert_eq!(flow.nid, nid);
        assert_eq!(store.find_by_id(&ctx, flow.id).await.unwrap().nid, nid);
    }

    #[tokio::test]
    async fn test_create_duplicate_id_conflicts() {
        let store = storage();
        let ctx = RequestContext::for_tenant(Nid::new());
        let mut flow = LoginFlow::new(Duration::from_secs(600), "/");
        store.create(&ctx, &mut flow).await.unwrap();

        let mut dup = flow.clone();
        let err = store.create(&ctx, &mut dup).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_from_other_tenant_is_not_found() {
        let store = storage();
        let owner = RequestContext::for_tenant(Nid::new());
        let intruder = RequestContext::for_tenant(Nid::new());

        let mut flow = LoginFlow::new(Duration::from_secs(600), "/");
        store.create(&owner, &mut flow).await.unwrap();

        let mut forged = flow.clone();
        forged.return_to = Some("https://evil.example".into());
        let err = store.update(&intruder, &mut forged).await.unwrap_err();
        assert!(err.is_not_found());

        let stored = store.find_by_id(&owner, flow.id).await.unwrap();
        assert_eq!(stored.return_to, None);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_rejected() {
        let store = storage();
        let mut flow = LoginFlow::new(Duration::from_secs(600), "/");
        let err = store
            .create(&RequestContext::new(), &mut flow)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TenantUnresolved));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_force_unknown_flow_is_not_found() {
        let store = storage();
        let ctx = RequestContext::for_tenant(Nid::new());
        let err = store.force_refresh(&ctx, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sweep_rejects_zero_batch() {
        let store = storage();
        let ctx = RequestContext::new();
        let err = store
            .delete_expired(&ctx, OffsetDateTime::now_utc(), 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvariantViolation { .. }));
    }
}
