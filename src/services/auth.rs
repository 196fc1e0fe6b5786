// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication client and session store.
//!
//! Handles:
//! - Sign-up, password sign-in and sign-out against `/auth/v1`
//! - Persisting the session in on-device storage
//! - Token refresh shortly before expiry
//! - Fan-out of identity changes to subscribers

use crate::config::RemoteConfig;
use crate::db::{keys, DurableStore};
use crate::error::{Result, SyncError};
use crate::models::session::{summarize_error_body, AuthPayload};
use crate::models::{Identity, Session};
use crate::time_utils::Clock;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use validator::ValidateEmail;

/// Low-level client for the `/auth/v1` endpoints.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, remote: &RemoteConfig) -> Self {
        Self {
            http,
            base_url: format!("{}/auth/v1", remote.url),
            anon_key: remote.anon_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a new account.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthPayload> {
        let response = self
            .http
            .post(self.url("/signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if status.is_success() {
            return parse_body(&body);
        }

        tracing::warn!(status = %status, "Sign-up rejected");
        match status.as_u16() {
            400..=499 => Err(SyncError::InvalidCredentialsFormat(summarize_error_body(
                &body,
                "sign-up rejected",
            ))),
            code => Err(SyncError::RequestFailed { status: code, body }),
        }
    }

    /// Exchange e-mail and password for a session.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthPayload> {
        let response = self
            .http
            .post(self.url("/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if status.is_success() {
            return parse_body(&body);
        }

        tracing::warn!(status = %status, "Sign-in rejected");
        match status.as_u16() {
            400 | 401 | 403 | 422 => Err(SyncError::AuthenticationFailed(summarize_error_body(
                &body,
                "invalid login credentials",
            ))),
            code => Err(SyncError::RequestFailed { status: code, body }),
        }
    }

    /// Trade a refresh token for a new session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthPayload> {
        let response = self
            .http
            .post(self.url("/token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            return Err(SyncError::RefreshFailed(format!(
                "HTTP {}: {}",
                status,
                summarize_error_body(&body, "refresh rejected")
            )));
        }
        parse_body(&body)
    }

    /// Invalidate the session server-side.
    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(SyncError::RequestFailed {
            status: status.as_u16(),
            body,
        })
    }

    /// Look up the user behind an access token. `None` when the token is rejected.
    pub async fn get_user(&self, access_token: &str) -> Result<Option<Identity>> {
        let response = self
            .http
            .get(self.url("/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        parse_body(&body).map(Some)
    }

    /// Check that the auth service answers.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(self.url("/health"))
            .header("apikey", &self.anon_key)
            .send()
            .await?;

        let (status, body) = read_body(response).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(SyncError::RequestFailed {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_body(response: reqwest::Response) -> Result<(StatusCode, String)> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    Ok(serde_json::from_str(body)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionStore - owns the session and its lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Margin before token expiration when we proactively refresh.
pub const SESSION_REFRESH_MARGIN_SECS: i64 = 30;

/// Callback invoked with the current identity after every auth transition.
pub type AuthListener = Arc<dyn Fn(Option<&Identity>) + Send + Sync>;

/// Owner of the authentication session.
///
/// This store encapsulates:
/// - Loading and persisting the session in durable storage
/// - Refresh when the token is within 30 seconds of expiry
/// - A single refresh lock so concurrent callers share one refresh
/// - Subscriber notification on sign-in, sign-out and refresh failure
pub struct SessionStore {
    client: AuthClient,
    storage: Arc<dyn DurableStore>,
    clock: Clock,
    session: Mutex<Option<Session>>,
    /// Serializes refresh operations.
    refresh_lock: tokio::sync::Mutex<()>,
    /// Serializes writes of the session to storage.
    persist_lock: tokio::sync::Mutex<()>,
    listeners: DashMap<u64, AuthListener>,
    next_listener_id: AtomicU64,
}

impl SessionStore {
    /// Create a store, restoring any session saved by a previous run.
    pub async fn open(
        client: AuthClient,
        storage: Arc<dyn DurableStore>,
        clock: Clock,
    ) -> Arc<Self> {
        let restored = match storage.get(keys::SESSION).await {
            Ok(Some(raw)) => Session::from_stored(&raw),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored session");
                None
            }
        };

        if let Some(session) = &restored {
            tracing::info!(
                user_id = session.user.as_ref().map(|u| u.id.as_str()).unwrap_or("unknown"),
                "Restored stored session"
            );
        }

        Arc::new(Self {
            client,
            storage,
            clock,
            session: Mutex::new(restored),
            refresh_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the stored session without any refresh.
    pub fn snapshot(&self) -> Option<Session> {
        self.slot().clone()
    }

    // ─── Sign-in / Sign-out ──────────────────────────────────────

    /// Create an account and sign in with it.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        if !email.validate_email() {
            return Err(SyncError::InvalidCredentialsFormat(
                "invalid e-mail address".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(SyncError::InvalidCredentialsFormat(
                "password must not be empty".to_string(),
            ));
        }

        let payload = self.client.sign_up(email, password).await?;
        let Some(session) = payload.into_session(self.clock.now_epoch_secs(), None) else {
            tracing::info!("Sign-up accepted, waiting for e-mail confirmation");
            return Err(SyncError::ConfirmationPending(email.to_string()));
        };

        self.commit(Some(session.clone())).await;
        tracing::info!("Signed up");
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let payload = self
            .client
            .sign_in_with_password(email.trim(), password)
            .await?;
        let session = payload
            .into_session(self.clock.now_epoch_secs(), None)
            .ok_or_else(|| {
                SyncError::AuthenticationFailed("response carried no session".to_string())
            })?;

        self.commit(Some(session.clone())).await;
        tracing::info!(
            user_id = session.user.as_ref().map(|u| u.id.as_str()).unwrap_or("unknown"),
            "Signed in"
        );
        Ok(session)
    }

    /// Sign out remotely if possible, then always forget the local session.
    pub async fn sign_out(&self) {
        if let Some(session) = self.snapshot() {
            if let Err(e) = self.client.sign_out(&session.access_token).await {
                tracing::warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }
        self.commit(None).await;
        tracing::info!("Signed out");
    }

    // ─── Session validity ────────────────────────────────────────

    /// Current session, refreshed first if it is about to expire.
    ///
    /// Only one refresh runs at a time: callers that arrive while a refresh is
    /// in flight wait for it and then reuse its result.
    pub async fn valid_session(&self) -> Result<Option<Session>> {
        let Some(current) = self.snapshot() else {
            return Ok(None);
        };
        if !current.expires_within(self.clock.now_epoch_secs(), SESSION_REFRESH_MARGIN_SECS) {
            return Ok(Some(current));
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed (or cleared) while we were waiting.
        let Some(current) = self.snapshot() else {
            return Ok(None);
        };
        if !current.expires_within(self.clock.now_epoch_secs(), SESSION_REFRESH_MARGIN_SECS) {
            return Ok(Some(current));
        }

        tracing::info!("Session expiring, refreshing");
        self.refresh_locked(current).await.map(Some)
    }

    /// Refresh after the server rejected `stale_access_token`.
    ///
    /// If another caller already replaced that token, its session is returned
    /// without a second network refresh.
    pub async fn force_refresh(&self, stale_access_token: &str) -> Result<Session> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.snapshot().ok_or(SyncError::AuthenticationRequired)?;
        if current.access_token != stale_access_token {
            return Ok(current);
        }

        tracing::info!("Access token rejected, forcing refresh");
        self.refresh_locked(current).await
    }

    /// Perform the refresh. Caller must hold `refresh_lock`.
    ///
    /// The outcome is applied only if `current` is still the stored session
    /// when the call returns; a sign-in or sign-out that happened meanwhile
    /// wins.
    async fn refresh_locked(&self, current: Session) -> Result<Session> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            tracing::warn!("Session has no refresh token, signing out");
            self.replace_if_current(&current.access_token, None).await;
            return Err(SyncError::RefreshFailed("no refresh token".to_string()));
        };

        match self.client.refresh(refresh_token).await {
            Ok(payload) => {
                let renewed =
                    payload.into_session(self.clock.now_epoch_secs(), current.user.clone());
                match renewed {
                    Some(session) => {
                        if !self
                            .replace_if_current(&current.access_token, Some(session.clone()))
                            .await
                        {
                            tracing::info!("Session changed during refresh, discarding result");
                            return self.snapshot().ok_or(SyncError::AuthenticationRequired);
                        }
                        tracing::info!(expires_at = session.expires_at, "Session refreshed");
                        Ok(session)
                    }
                    None => {
                        tracing::warn!("Refresh response carried no session, signing out");
                        self.replace_if_current(&current.access_token, None).await;
                        Err(SyncError::RefreshFailed(
                            "response carried no session".to_string(),
                        ))
                    }
                }
            }
            Err(e) if e.is_transport() => {
                tracing::warn!(error = %e, "Refresh request failed, keeping session for retry");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh rejected, signing out");
                self.replace_if_current(&current.access_token, None).await;
                Err(match e {
                    SyncError::RefreshFailed(_) => e,
                    other => SyncError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    // ─── Identity ────────────────────────────────────────────────

    /// Signed-in user, or `None` when signed out or the session cannot be renewed.
    pub async fn get_current_identity(&self) -> Option<Identity> {
        let session = match self.valid_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "No usable session");
                return None;
            }
        };

        if let Some(user) = session.user.clone() {
            return Some(user);
        }

        match self.client.get_user(&session.access_token).await {
            Ok(Some(user)) => {
                let token = session.access_token.clone();
                let mut updated = session;
                updated.user = Some(user.clone());
                if self.replace_if_current(&token, Some(updated)).await {
                    Some(user)
                } else {
                    self.snapshot().and_then(|s| s.user)
                }
            }
            Ok(None) => {
                tracing::warn!("Access token rejected during user lookup, signing out");
                self.replace_if_current(&session.access_token, None).await;
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed");
                None
            }
        }
    }

    /// Like [`Self::get_current_identity`] but failing when nobody is signed in.
    pub async fn require_identity(&self) -> Result<Identity> {
        self.get_current_identity()
            .await
            .ok_or(SyncError::AuthenticationRequired)
    }

    /// Whether the auth service is reachable.
    pub async fn probe(&self) -> bool {
        match self.client.health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(error = %e, "Remote backend health check failed");
                false
            }
        }
    }

    // ─── Subscribers ─────────────────────────────────────────────

    /// Register `listener` and call it once with the current identity.
    pub async fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(Option<&Identity>) + Send + Sync + 'static,
    {
        let identity = self.get_current_identity().await;

        let listener: AuthListener = Arc::new(listener);
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener.clone());

        listener(identity.as_ref());
        Subscription {
            id,
            store: Arc::downgrade(self),
        }
    }

    fn notify(&self) {
        let identity = self.snapshot().and_then(|s| s.user);
        // Collect first so listeners may unsubscribe without deadlocking the map.
        let listeners: Vec<AuthListener> =
            self.listeners.iter().map(|e| e.value().clone()).collect();
        for listener in listeners {
            listener(identity.as_ref());
        }
    }

    /// Replace the session, persist it and notify subscribers.
    async fn commit(&self, session: Option<Session>) {
        {
            let _persist = self.persist_lock.lock().await;
            self.store_locked(session).await;
        }
        self.notify();
    }

    /// Like [`Self::commit`], but only while the stored session still holds
    /// `expected_token`. Subscribers hear about it when the identity changes.
    ///
    /// Returns whether the session was replaced.
    async fn replace_if_current(&self, expected_token: &str, session: Option<Session>) -> bool {
        let announce = {
            let _persist = self.persist_lock.lock().await;
            let Some(stored) = self.snapshot() else {
                return false;
            };
            if stored.access_token != expected_token {
                return false;
            }
            let announce = stored.user.as_ref().map(|u| &u.id)
                != session.as_ref().and_then(|s| s.user.as_ref()).map(|u| &u.id);
            self.store_locked(session).await;
            announce
        };

        if announce {
            self.notify();
        }
        true
    }

    /// Swap the in-memory session and write it out. Caller must hold `persist_lock`.
    async fn store_locked(&self, session: Option<Session>) {
        let serialized = session.as_ref().map(serde_json::to_string);
        *self.slot() = session;

        let result = match serialized {
            Some(Ok(raw)) => self.storage.set(keys::SESSION, &raw).await,
            Some(Err(e)) => Err(SyncError::from(e)),
            None => self.storage.remove(keys::SESSION).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Could not persist session");
        }
    }
}

/// Handle returned by [`SessionStore::subscribe`].
pub struct Subscription {
    id: u64,
    store: Weak<SessionStore>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(store) = self.store.upgrade() {
            store.listeners.remove(&self.id);
        }
    }
}
