//! Login flow store behaviour against the in-memory implementation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;
use waypoint_auth::{
    AuthError, ContextualTenant, InMemoryLoginFlowStorage, LoginFlow, LoginFlowStorage, Nid,
    RequestContext,
};

fn storage() -> Arc<InMemoryLoginFlowStorage> {
    Arc::new(InMemoryLoginFlowStorage::new(common::strict_tenants()))
}

fn flow() -> LoginFlow {
    LoginFlow::new(Duration::from_secs(600), "https://app.example.com/login")
}

fn expired_flow(ago: time::Duration) -> LoginFlow {
    flow().with_expires_at(OffsetDateTime::now_utc() - ago)
}

async fn seed_expired(storage: &InMemoryLoginFlowStorage, ctx: &RequestContext, count: usize) {
    for i in 0..count {
        let mut flow = expired_flow(time::Duration::minutes(5) + time::Duration::seconds(i as i64));
        storage.create(ctx, &mut flow).await.unwrap();
    }
}

#[tokio::test]
async fn test_create_then_find_returns_same_flow() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());

    let mut flow = flow().with_return_to("https://app.example.com/home");
    flow.internal_context.set_for("oidc", serde_json::json!({"state": "abc"}));
    storage.create(&ctx, &mut flow).await.unwrap();

    let found = storage.find_by_id(&ctx, flow.id).await.unwrap();
    assert_eq!(found, flow);
    assert_eq!(found.nid, ctx.tenant().unwrap());
}

#[tokio::test]
async fn test_flows_are_invisible_across_tenants() {
    let storage = storage();
    let owner = RequestContext::for_tenant(Nid::new());
    let other = RequestContext::for_tenant(Nid::new());

    let mut flow = flow();
    storage.create(&owner, &mut flow).await.unwrap();

    let err = storage.find_by_id(&other, flow.id).await.unwrap_err();
    assert!(err.is_not_found());

    let err = storage.force_refresh(&other, flow.id).await.unwrap_err();
    assert!(err.is_not_found());

    let mut hijack = flow.clone();
    hijack.return_to = Some("https://evil.example.com".to_string());
    let err = storage.update(&other, &mut hijack).await.unwrap_err();
    assert!(err.is_not_found());

    let stored = storage.find_by_id(&owner, flow.id).await.unwrap();
    assert_eq!(stored.return_to, None);
    assert!(!stored.refresh);
}

#[tokio::test]
async fn test_update_ignores_caller_supplied_tenant() {
    let storage = storage();
    let owner = Nid::new();
    let ctx = RequestContext::for_tenant(owner);

    let mut flow = flow();
    storage.create(&ctx, &mut flow).await.unwrap();

    flow.nid = Nid::new();
    flow.active = Some("oidc".to_string());
    storage.update(&ctx, &mut flow).await.unwrap();

    assert_eq!(flow.nid, owner);
    let stored = storage.find_by_id(&ctx, flow.id).await.unwrap();
    assert_eq!(stored.active.as_deref(), Some("oidc"));
}

#[tokio::test]
async fn test_force_refresh_is_idempotent() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());

    let mut flow = flow();
    storage.create(&ctx, &mut flow).await.unwrap();

    storage.force_refresh(&ctx, flow.id).await.unwrap();
    let once = storage.find_by_id(&ctx, flow.id).await.unwrap();
    storage.force_refresh(&ctx, flow.id).await.unwrap();
    let twice = storage.find_by_id(&ctx, flow.id).await.unwrap();

    assert!(once.refresh);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_force_refresh_unknown_flow_fails_like_find() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());
    let id = Uuid::new_v4();

    let find = storage.find_by_id(&ctx, id).await.unwrap_err();
    let force = storage.force_refresh(&ctx, id).await.unwrap_err();
    assert_eq!(find.category(), force.category());
    assert!(force.is_not_found());
}

#[tokio::test]
async fn test_concurrent_force_and_update_keep_refresh() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());

    for _ in 0..50 {
        let mut flow = flow();
        storage.create(&ctx, &mut flow).await.unwrap();

        // The updater works from a copy read before the force.
        let mut stale = storage.find_by_id(&ctx, flow.id).await.unwrap();
        stale.active = Some("oidc".to_string());

        let forcer = {
            let storage = Arc::clone(&storage);
            let ctx = ctx.clone();
            tokio::spawn(async move { storage.force_refresh(&ctx, flow.id).await })
        };
        let updater = {
            let storage = Arc::clone(&storage);
            let ctx = ctx.clone();
            tokio::spawn(async move { storage.update(&ctx, &mut stale).await })
        };
        forcer.await.unwrap().unwrap();
        updater.await.unwrap().unwrap();

        let stored = storage.find_by_id(&ctx, flow.id).await.unwrap();
        assert!(stored.refresh, "forced refresh lost to a concurrent update");
        assert_eq!(stored.active.as_deref(), Some("oidc"));
    }
}

#[tokio::test]
async fn test_sweep_runs_bounded_passes() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());
    seed_expired(&storage, &ctx, 250).await;

    let report = storage
        .delete_expired(&ctx, OffsetDateTime::now_utc(), 1000, 100)
        .await
        .unwrap();

    assert_eq!(report.deleted, 250);
    assert_eq!(report.passes, vec![100, 100, 50]);
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn test_sweep_respects_limit() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());
    seed_expired(&storage, &ctx, 250).await;

    let report = storage
        .delete_expired(&ctx, OffsetDateTime::now_utc(), 150, 100)
        .await
        .unwrap();

    assert_eq!(report.deleted, 150);
    assert_eq!(report.passes, vec![100, 50]);
    assert_eq!(storage.len().await, 100);
}

#[tokio::test]
async fn test_sweep_spans_tenants_and_spares_live_flows() {
    let storage = storage();
    let a = RequestContext::for_tenant(Nid::new());
    let b = RequestContext::for_tenant(Nid::new());
    seed_expired(&storage, &a, 3).await;
    seed_expired(&storage, &b, 4).await;

    let mut live = flow();
    storage.create(&a, &mut live).await.unwrap();

    // Expired, but inside the grace window of the cutoff.
    let mut recent = expired_flow(time::Duration::seconds(10));
    storage.create(&b, &mut recent).await.unwrap();

    let cutoff = OffsetDateTime::now_utc() - time::Duration::minutes(1);
    let report = storage
        .delete_expired(&RequestContext::new(), cutoff, 100, 10)
        .await
        .unwrap();

    assert_eq!(report.deleted, 7);
    assert!(storage.find_by_id(&a, live.id).await.is_ok());
    assert!(storage.find_by_id(&b, recent.id).await.is_ok());
}

#[tokio::test]
async fn test_expired_flow_is_rejected_before_sweep() {
    let storage = storage();
    let ctx = RequestContext::for_tenant(Nid::new());

    let mut flow = expired_flow(time::Duration::seconds(1));
    storage.create(&ctx, &mut flow).await.unwrap();

    let mut found = storage.find_by_id(&ctx, flow.id).await.unwrap();
    let now = OffsetDateTime::now_utc();
    assert!(matches!(
        found.ensure_active(now),
        Err(AuthError::FlowExpired { id }) if id == flow.id
    ));
    assert!(found.complete("oidc", now).is_err());
}

#[tokio::test]
async fn test_single_tenant_default_applies() {
    let nid = Nid::new();
    let storage = InMemoryLoginFlowStorage::new(Arc::new(ContextualTenant::new(nid)));

    let mut flow = flow();
    storage.create(&RequestContext::new(), &mut flow).await.unwrap();
    assert_eq!(flow.nid, nid);
    assert!(
        storage
            .find_by_id(&RequestContext::for_tenant(nid), flow.id)
            .await
            .is_ok()
    );
}
