// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types shared by the session, gateway, backend and progress layers.

/// Errors surfaced by the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentialsFormat(String),

    #[error("Account created for {0}, e-mail confirmation pending")]
    ConfirmationPending(String),

    #[error("Session refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Upsert failed with status {status}: {body}")]
    UpsertFailed { status: u16, body: String },

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Upsert called without rows")]
    NoRows,

    #[error("Remote backend is not configured")]
    NotConfigured,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// True for errors that mean the caller has no usable session.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationRequired
                | SyncError::AuthenticationFailed(_)
                | SyncError::RefreshFailed(_)
        ) || self.status() == Some(401)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::UpsertFailed { status, .. } | SyncError::RequestFailed { status, .. } => {
                Some(*status)
            }
            SyncError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the server could not be reached or the exchange broke off.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Http(_))
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_classified() {
        assert!(SyncError::AuthenticationRequired.is_auth_error());
        assert!(SyncError::RefreshFailed("expired".to_string()).is_auth_error());
        assert!(SyncError::RequestFailed {
            status: 401,
            body: String::new()
        }
        .is_auth_error());
        assert!(!SyncError::NotConfigured.is_auth_error());
        assert!(!SyncError::UpsertFailed {
            status: 500,
            body: "boom".to_string()
        }
        .is_auth_error());
    }

    #[test]
    fn test_status_is_exposed() {
        let err = SyncError::UpsertFailed {
            status: 409,
            body: "conflict".to_string(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(SyncError::NoRows.status(), None);
    }
}
