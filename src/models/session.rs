// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication session model and auth response normalisation.

use serde::{Deserialize, Serialize};

/// Lifetime assumed when the backend reports neither `expires_at` nor `expires_in`.
const DEFAULT_SESSION_LIFETIME_SECS: i64 = 3600;

/// Authenticated user as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user ID (UUID string)
    pub id: String,
    /// E-mail address (absent for phone-only accounts)
    #[serde(default)]
    pub email: Option<String>,
}

/// Credential bundle persisted on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry (Unix seconds)
    pub expires_at: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Option<Identity>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// True when the token expires within `margin_secs` of `now`.
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at <= now + margin_secs
    }

    /// Parse a stored session, discarding anything without an access token.
    pub fn from_stored(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Session>(raw) {
            Ok(session) if !session.access_token.is_empty() => Some(session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Stored session could not be parsed, ignoring it");
                None
            }
        }
    }
}

/// Auth endpoint response body.
///
/// The session is either nested under `session` or spread over the top level.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub session: Option<Box<AuthPayload>>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user: Option<Identity>,
}

impl AuthPayload {
    /// Build a session, deriving `expires_at` from `expires_in` when absent.
    ///
    /// `fallback_user` fills in the identity when the payload has none
    /// (refresh responses may omit it).
    pub fn into_session(self, now: i64, fallback_user: Option<Identity>) -> Option<Session> {
        let AuthPayload {
            session,
            access_token,
            refresh_token,
            expires_in,
            expires_at,
            token_type,
            user,
        } = self;

        let fallback_user = user.or(fallback_user);
        if let Some(nested) = session {
            return nested.into_session(now, fallback_user);
        }

        let access_token = access_token.filter(|t| !t.is_empty())?;
        let expires_at = expires_at
            .or_else(|| expires_in.map(|secs| now + secs))
            .unwrap_or(now + DEFAULT_SESSION_LIFETIME_SECS);

        Some(Session {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            token_type: token_type.unwrap_or_else(default_token_type),
            user: fallback_user,
        })
    }
}

/// Best human-readable message from an auth/REST error body.
pub fn summarize_error_body(body: &str, fallback: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["error_description", "message", "msg", "error"]
                .iter()
                .find_map(|field| v.get(*field).and_then(|m| m.as_str()))
        })
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
