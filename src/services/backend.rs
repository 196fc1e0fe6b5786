// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interchangeable persistence backends for the progress document.
//!
//! Both variants store the document as opaque JSON; shape and migration are
//! the progress store's business.

use crate::config::Config;
use crate::db::{keys, DurableStore};
use crate::error::{Result, SyncError};
use crate::services::rest::{Filter, RestGateway, UpsertOptions};
use crate::time_utils::{format_utc_rfc3339, Clock};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Backend requested by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendPreference {
    Local,
    Remote,
    /// Remote when credentials are set and the service answers, else local
    #[default]
    Auto,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "supabase" => Ok(Self::Remote),
            "auto" | "" => Ok(Self::Auto),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

/// Whose document a backend call reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Whoever uses this device; no account involved
    Device,
    User(String),
}

impl Owner {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Device => None,
            Self::User(id) => Some(id),
        }
    }
}

/// Load/save/clear over one owner's progress document.
///
/// Every call names the owner it was meant for, so a write queued before a
/// change of user cannot land in the new user's document.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Owner the next load should be made for.
    async fn current_owner(&self) -> Result<Owner>;

    /// Stored document, or `None` if there is none yet.
    async fn load(&self, owner: &Owner) -> Result<Option<Value>>;

    async fn save(&self, owner: &Owner, document: &Value) -> Result<()>;

    async fn clear(&self, owner: &Owner) -> Result<()>;
}

// ─── Local ───────────────────────────────────────────────────────

/// Document kept under one key of on-device storage.
///
/// Storage failures never propagate: `load` reports them as "no document",
/// `save` and `clear` log and carry on.
pub struct LocalBackend {
    store: Arc<dyn DurableStore>,
    key: String,
}

impl LocalBackend {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_key(store, keys::PROGRESS)
    }

    pub fn with_key(store: Arc<dyn DurableStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    async fn read(&self) -> Option<Value> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Local progress unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Local progress is not valid JSON");
                None
            }
        }
    }

    async fn write(&self, document: &Value) {
        let raw = match serde_json::to_string(document) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Could not serialize progress");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &raw).await {
            tracing::warn!(key = %self.key, error = %e, "Could not save local progress");
        }
    }

    async fn remove(&self) {
        if let Err(e) = self.store.remove(&self.key).await {
            tracing::warn!(key = %self.key, error = %e, "Could not clear local progress");
        }
    }
}

/// One document per device: the owner argument is not consulted.
#[async_trait]
impl ProgressBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn current_owner(&self) -> Result<Owner> {
        Ok(Owner::Device)
    }

    async fn load(&self, _owner: &Owner) -> Result<Option<Value>> {
        Ok(self.read().await)
    }

    async fn save(&self, _owner: &Owner, document: &Value) -> Result<()> {
        self.write(document).await;
        Ok(())
    }

    async fn clear(&self, _owner: &Owner) -> Result<()> {
        self.remove().await;
        Ok(())
    }
}

// ─── Remote ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StateRow {
    #[serde(default)]
    state: Option<Value>,
}

/// Document stored as a `{ user_id, state, updated_at }` row.
///
/// A device-local mirror of the signed-in user's document is kept so a
/// failed upload still leaves the change on the device, and is read back
/// when the server cannot be reached.
pub struct RemoteBackend {
    gateway: RestGateway,
    table: String,
    mirror: Arc<dyn DurableStore>,
    clock: Clock,
}

impl RemoteBackend {
    pub fn new(
        gateway: RestGateway,
        table: impl Into<String>,
        mirror: Arc<dyn DurableStore>,
        clock: Clock,
    ) -> Self {
        Self {
            gateway,
            table: table.into(),
            mirror,
            clock,
        }
    }

    fn mirror_for(&self, user_id: &str) -> LocalBackend {
        LocalBackend::with_key(self.mirror.clone(), keys::progress_mirror(user_id))
    }

    /// Fail unless `user_id` is the one signed in right now.
    async fn ensure_signed_in_as(&self, user_id: &str) -> Result<()> {
        let identity = self.gateway.session().require_identity().await?;
        if identity.id != user_id {
            tracing::warn!(
                owner = user_id,
                signed_in = %identity.id,
                "Progress belongs to another user, refusing remote access"
            );
            return Err(SyncError::AuthenticationRequired);
        }
        Ok(())
    }
}

fn owner_id(owner: &Owner) -> Result<&str> {
    owner.user_id().ok_or(SyncError::AuthenticationRequired)
}

#[async_trait]
impl ProgressBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn current_owner(&self) -> Result<Owner> {
        let session = self.gateway.session();
        if let Some(user) = session.snapshot().and_then(|s| s.user) {
            return Ok(Owner::User(user.id));
        }
        Ok(Owner::User(session.require_identity().await?.id))
    }

    async fn load(&self, owner: &Owner) -> Result<Option<Value>> {
        let user_id = owner_id(owner)?;
        self.ensure_signed_in_as(user_id).await?;
        let mirror = self.mirror_for(user_id);

        let rows = self
            .gateway
            .select::<StateRow>(
                &self.table,
                &[Filter::eq("user_id", user_id)],
                "state",
                Some(1),
            )
            .await;

        match rows {
            Ok(rows) => match rows.into_iter().next().and_then(|row| row.state) {
                Some(state) => {
                    mirror.write(&state).await;
                    Ok(Some(state))
                }
                None => Ok(None),
            },
            Err(SyncError::RequestFailed { status: 404, .. }) => Ok(None),
            Err(e) if e.is_transport() => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "Remote progress unreachable, using local copy"
                );
                Ok(mirror.read().await)
            }
            Err(e) => Err(e),
        }
    }

    /// The owner's mirror is written even when the upload is refused.
    async fn save(&self, owner: &Owner, document: &Value) -> Result<()> {
        let user_id = owner_id(owner)?;
        self.mirror_for(user_id).write(document).await;
        self.ensure_signed_in_as(user_id).await?;

        let row = serde_json::json!({
            "user_id": user_id,
            "state": document,
            "updated_at": format_utc_rfc3339(self.clock.now()),
        });
        let options = UpsertOptions {
            on_conflict: Some("user_id".to_string()),
            ..UpsertOptions::default()
        };
        self.gateway.upsert(&self.table, &[row], &options).await?;

        tracing::debug!(user_id, table = %self.table, "Progress uploaded");
        Ok(())
    }

    async fn clear(&self, owner: &Owner) -> Result<()> {
        let user_id = owner_id(owner)?;
        self.ensure_signed_in_as(user_id).await?;
        self.mirror_for(user_id).remove().await;
        self.gateway
            .delete(&self.table, &[Filter::eq("user_id", user_id)])
            .await
    }
}

// ─── Selection ───────────────────────────────────────────────────

/// Pick the backend for this process.
///
/// `gateway` is `None` when no remote credentials are configured.
pub async fn select_backend(
    config: &Config,
    store: Arc<dyn DurableStore>,
    gateway: Option<RestGateway>,
    clock: Clock,
) -> Result<Arc<dyn ProgressBackend>> {
    let remote = |gateway: RestGateway| -> Arc<dyn ProgressBackend> {
        Arc::new(RemoteBackend::new(
            gateway,
            config.progress_table.clone(),
            store.clone(),
            clock,
        ))
    };

    let backend: Arc<dyn ProgressBackend> = match (config.backend, gateway) {
        (BackendPreference::Local, _) => Arc::new(LocalBackend::new(store.clone())),
        (BackendPreference::Remote, Some(gateway)) => remote(gateway),
        (BackendPreference::Remote, None) => return Err(SyncError::NotConfigured),
        (BackendPreference::Auto, Some(gateway)) => {
            if gateway.session().probe().await {
                remote(gateway)
            } else {
                tracing::info!("Remote backend unreachable, falling back to local storage");
                Arc::new(LocalBackend::new(store.clone()))
            }
        }
        (BackendPreference::Auto, None) => Arc::new(LocalBackend::new(store.clone())),
    };

    tracing::info!(backend = ?backend.kind(), "Progress backend selected");
    Ok(backend)
}
