// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session, REST and progress layers.

pub mod auth;
pub mod backend;
pub mod progress;
pub mod rest;

pub use auth::{AuthClient, SessionStore, Subscription};
pub use backend::{
    select_backend, BackendKind, BackendPreference, LocalBackend, Owner, ProgressBackend,
    RemoteBackend,
};
pub use progress::{ProgressStore, SyncStatus};
pub use rest::{Filter, RestGateway, ReturnPolicy, UpsertOptions};

use crate::config::Config;
use crate::error::Result;

/// Shared HTTP client for auth and REST calls.
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?)
}
