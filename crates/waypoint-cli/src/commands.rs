use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use time::OffsetDateTime;
use waypoint_auth::config::SweepConfig;
use waypoint_auth::{LoginFlowStorage, RequestContext, SelfServiceConfig};
use waypoint_auth_postgres::{PostgresLoginFlowStorage, connect, migrations};

use crate::cli::SweepArgs;

/// Sweep settings after applying command-line overrides.
#[derive(Debug, PartialEq, Eq)]
pub struct SweepPlan {
    pub limit: u64,
    pub batch_size: u64,
    pub grace: Duration,
}

impl SweepPlan {
    pub fn resolve(config: &SweepConfig, args: &SweepArgs) -> Result<Self> {
        let plan = Self {
            limit: args.limit.unwrap_or(config.limit),
            batch_size: args.batch_size.unwrap_or(config.batch_size),
            grace: args.grace.unwrap_or(config.grace),
        };
        if plan.batch_size == 0 {
            anyhow::bail!("batch size must be greater than zero");
        }
        Ok(plan)
    }

    pub fn cutoff(&self, now: OffsetDateTime) -> Result<OffsetDateTime> {
        let grace = time::Duration::try_from(self.grace).context("grace period out of range")?;
        now.checked_sub(grace).context("grace period out of range")
    }
}

pub async fn sweep_flows(config: &SelfServiceConfig, args: &SweepArgs) -> Result<Value> {
    let plan = SweepPlan::resolve(&config.flows.sweep, args)?;
    let cutoff = plan.cutoff(OffsetDateTime::now_utc())?;

    let pool = connect(&args.database_url)
        .await
        .context("failed to connect to database")?;
    if args.migrate {
        migrations::run(&pool).await.context("failed to apply migrations")?;
    }
    let storage = PostgresLoginFlowStorage::new(pool, Arc::new(config.tenant_resolver()));

    let ctx = match args.timeout {
        Some(timeout) => RequestContext::new().with_timeout(timeout),
        None => RequestContext::new(),
    };

    tracing::info!(
        limit = plan.limit,
        batch_size = plan.batch_size,
        %cutoff,
        "starting expiry sweep"
    );
    let report = storage
        .delete_expired(&ctx, cutoff, plan.limit, plan.batch_size)
        .await
        .context("expiry sweep failed")?;

    Ok(json!({
        "cutoff": cutoff.to_string(),
        "deleted": report.deleted,
        "passes": report.passes,
    }))
}

pub fn check_config(config: &SelfServiceConfig) -> Result<Value> {
    let registry = config
        .provider_registry()
        .context("invalid configuration")?;

    let providers: Vec<Value> = config
        .federation
        .providers
        .iter()
        .map(|entry| {
            json!({
                "id": entry.provider.id,
                "kind": entry.provider.kind.to_string(),
                "tenant": entry.tenant.or(config.default_tenant).map(|nid| nid.to_string()),
            })
        })
        .collect();

    tracing::debug!(cached_clients = registry.cached_clients(), "provider registry built");

    Ok(json!({
        "public_base_url": config.public_base_url,
        "flow_lifespan": humantime::format_duration(config.flows.lifespan).to_string(),
        "sweep": {
            "limit": config.flows.sweep.limit,
            "batch_size": config.flows.sweep.batch_size,
            "grace": humantime::format_duration(config.flows.sweep.grace).to_string(),
        },
        "providers": providers,
    }))
}
