//! Storage traits for login flows.
//!
//! This module defines the tenant-scoped persistence contract for
//! [`LoginFlow`] entities.
//!
//! # Implementations
//!
//! - [`memory::InMemoryLoginFlowStorage`] - single-process reference store
//! - PostgreSQL (in `waypoint-auth-postgres` crate)
//!
//! # Tenant isolation
//!
//! Implementations must resolve the tenant through a
//! [`TenantResolver`](crate::context::TenantResolver) on every call and filter
//! every read and write on it. A flow owned by another tenant is reported as
//! `NotFound`, exactly like a flow that does not exist.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::flow::LoginFlow;

pub use memory::InMemoryLoginFlowStorage;

/// Storage trait for login flows.
#[async_trait]
pub trait LoginFlowStorage: Send + Sync {
    /// Persists a new flow.
    ///
    /// Assigns `flow.nid` from the request context and initialises an empty
    /// internal context when it is missing.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a flow with the same ID already exists,
    /// `TenantUnresolved` if no tenant applies, or `StoreUnavailable` on
    /// infrastructure failure.
    async fn create(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()>;

    /// Persists all mutable fields of an existing flow.
    ///
    /// The tenant is re-derived from the request context; the `nid` carried
    /// by `flow` is overwritten, never trusted. A `refresh` flag that is
    /// already set in storage stays set, and `flow.refresh` reflects the
    /// persisted value afterwards.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no flow matches both the ID and the tenant.
    async fn update(&self, ctx: &RequestContext, flow: &mut LoginFlow) -> AuthResult<()>;

    /// Fetches a flow by ID within the resolved tenant.
    ///
    /// Expired flows are still returned; callers check
    /// [`LoginFlow::ensure_active`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the flow does not exist or belongs to another
    /// tenant.
    async fn find_by_id(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<LoginFlow>;

    /// Atomically marks the flow as requiring forced re-authentication.
    ///
    /// Only the `refresh` field is written. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails exactly like [`find_by_id`](Self::find_by_id) when the flow is
    /// not visible to the tenant.
    async fn force_refresh(&self, ctx: &RequestContext, id: Uuid) -> AuthResult<()>;

    /// Deletes flows with `expires_at <= cutoff` across all tenants.
    ///
    /// Runs bounded passes of at most `batch_size` rows until a pass comes up
    /// short or `limit` rows have been deleted. Meant to be invoked
    /// repeatedly by an external scheduler; safe to run concurrently with
    /// itself and with regular flow traffic.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if `batch_size` is zero, or
    /// `StoreUnavailable` on infrastructure failure. Rows deleted by passes
    /// that completed before the failure stay deleted.
    async fn delete_expired(
        &self,
        ctx: &RequestContext,
        cutoff: OffsetDateTime,
        limit: u64,
        batch_size: u64,
    ) -> AuthResult<DeleteExpiredReport>;
}

/// Outcome of one [`LoginFlowStorage::delete_expired`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteExpiredReport {
    /// Total rows deleted.
    pub deleted: u64,
    /// Rows deleted by each pass, in order.
    pub passes: Vec<u64>,
}

impl DeleteExpiredReport {
    /// Number of passes executed.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}

/// Pass bookkeeping shared by the expiry sweep implementations.
#[derive(Debug)]
pub struct SweepBudget {
    limit: u64,
    batch_size: u64,
    report: DeleteExpiredReport,
    exhausted: bool,
}

impl SweepBudget {
    /// Creates a budget of `limit` rows deleted `batch_size` at a time.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if `batch_size` is zero.
    pub fn new(limit: u64, batch_size: u64) -> AuthResult<Self> {
        if batch_size == 0 {
            return Err(AuthError::invariant("expiry sweep batch size must be positive"));
        }
        Ok(Self {
            limit,
            batch_size,
            report: DeleteExpiredReport::default(),
            exhausted: false,
        })
    }

    /// Returns the row count the next pass may delete, or `None` when the
    /// sweep is done.
    #[must_use]
    pub fn next_pass(&self) -> Option<u64> {
        if self.exhausted {
            return None;
        }
        let remaining = self.limit.saturating_sub(self.report.deleted);
        if remaining == 0 {
            return None;
        }
        Some(remaining.min(self.batch_size))
    }

    /// Records a finished pass. A pass that deleted fewer rows than it
    /// requested ends the sweep.
    pub fn record(&mut self, requested: u64, deleted: u64) {
        self.report.deleted += deleted;
        self.report.passes.push(deleted);
        if deleted < requested {
            self.exhausted = true;
        }
    }

    /// Returns the final report.
    #[must_use]
    pub fn finish(self) -> DeleteExpiredReport {
        self.report
    }
}
