//! Login flow model.
//!
//! A [`LoginFlow`] represents one in-progress or completed login attempt.
//! Flows are owned by the [`LoginFlowStorage`](crate::storage::LoginFlowStorage)
//! and are always scoped to exactly one tenant.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::context::Nid;
use crate::error::AuthError;

/// Lifecycle state of a login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Waiting for the user to complete a login method.
    #[default]
    Pending,
    /// A login method succeeded.
    Completed,
}

impl FlowState {
    /// Returns the state as stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for FlowState {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(AuthError::invariant(format!(
                "unknown login flow state '{}'",
                other
            ))),
        }
    }
}

/// Strategy-private payload attached to a flow.
///
/// The store persists and returns it verbatim. Each strategy keeps its data
/// under its own top-level key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalContext(serde_json::Value);

impl InternalContext {
    /// Creates an empty context (`{}`).
    #[must_use]
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Wraps an existing JSON value.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Replaces anything that is not a JSON object with `{}`.
    pub fn ensure(&mut self) {
        if !self.0.is_object() {
            *self = Self::empty();
        }
    }

    /// Returns the payload stored by `strategy`.
    #[must_use]
    pub fn get_for(&self, strategy: &str) -> Option<&serde_json::Value> {
        self.0.get(strategy)
    }

    /// Stores `value` under `strategy`, replacing its previous payload.
    pub fn set_for(&mut self, strategy: impl Into<String>, value: serde_json::Value) {
        self.ensure();
        if let serde_json::Value::Object(map) = &mut self.0 {
            map.insert(strategy.into(), value);
        }
    }

    /// Returns the raw JSON value.
    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the context and returns the raw JSON value.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl Default for InternalContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// One login attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginFlow {
    /// Flow ID, generated at creation.
    pub id: Uuid,

    /// Owning tenant. Assigned by the store from the request context.
    pub nid: Nid,

    /// The URL of the request that initiated the flow.
    pub request_url: String,

    /// Where to send the user after a successful login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,

    /// The login method the user picked (e.g. `oidc`, `password`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    /// Lifecycle state.
    #[serde(default)]
    pub state: FlowState,

    /// When set, the next authorization request must force re-authentication.
    #[serde(default)]
    pub refresh: bool,

    /// When the flow was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// After this instant the flow can no longer be completed.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Strategy-private payload.
    #[serde(default)]
    pub internal_context: InternalContext,

    /// Row creation time (storage-managed).
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last write time (storage-managed).
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl LoginFlow {
    /// Creates a pending flow that expires after `lifespan`.
    ///
    /// The tenant is a placeholder until the flow is persisted.
    #[must_use]
    pub fn new(lifespan: Duration, request_url: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            nid: Nid::from_uuid(Uuid::nil()),
            request_url: request_url.into(),
            return_to: None,
            active: None,
            state: FlowState::Pending,
            refresh: false,
            issued_at: now,
            expires_at: now + lifespan,
            internal_context: InternalContext::empty(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the return URL.
    #[must_use]
    pub fn with_return_to(mut self, return_to: impl Into<String>) -> Self {
        self.return_to = Some(return_to.into());
        self
    }

    /// Marks the flow as a forced re-authentication from the start.
    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Sets an explicit expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Returns `true` if the next authorization request must force login.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.refresh
    }

    /// Returns `true` if the flow expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Fails if the flow can no longer be completed.
    ///
    /// Expired flows fail this check whether or not the expiry sweep has
    /// already removed them.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::FlowExpired`] when `expires_at <= now`.
    pub fn ensure_active(&self, now: OffsetDateTime) -> AuthResult<()> {
        if self.is_expired_at(now) {
            return Err(AuthError::FlowExpired { id: self.id });
        }
        Ok(())
    }

    /// Marks the flow as completed by `method`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::FlowExpired`] if the flow expired.
    pub fn complete(&mut self, method: impl Into<String>, now: OffsetDateTime) -> AuthResult<()> {
        self.ensure_active(now)?;
        self.active = Some(method.into());
        self.state = FlowState::Completed;
        Ok(())
    }

    /// Guarantees that the internal context is a JSON object.
    pub fn ensure_internal_context(&mut self) {
        self.internal_context.ensure();
    }
}
