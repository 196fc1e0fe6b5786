// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Lingua-Sync: client-side progress synchronization for the learning app
//!
//! This crate owns a learner's progress document, persists it either on the
//! device or in a remote relational-API backend, and manages the
//! authentication session the remote backend needs.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{DurableStore, FileStore};
use error::{Result, SyncError};
use services::{AuthClient, ProgressStore, RestGateway, SessionStore};
use std::sync::Arc;
use time_utils::Clock;

/// Wired-up engine handed to the UI layer.
pub struct SyncEngine {
    pub config: Config,
    pub storage: Arc<dyn DurableStore>,
    /// Present only when remote credentials are configured
    pub session: Option<Arc<SessionStore>>,
    pub gateway: Option<RestGateway>,
    pub progress: ProgressStore,
}

impl SyncEngine {
    /// Build the engine with file storage under `config.data_dir`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage: Arc<dyn DurableStore> = Arc::new(FileStore::new(&config.data_dir));
        Self::with_storage(config, storage, Clock::default()).await
    }

    /// Build the engine on top of an existing store.
    pub async fn with_storage(
        config: Config,
        storage: Arc<dyn DurableStore>,
        clock: Clock,
    ) -> Result<Self> {
        let (session, gateway) = match &config.remote {
            Some(remote) => {
                let http = services::http_client(&config)?;
                let session = SessionStore::open(
                    AuthClient::new(http.clone(), remote),
                    storage.clone(),
                    clock,
                )
                .await;
                let gateway = RestGateway::new(http, remote, session.clone());
                (Some(session), Some(gateway))
            }
            None => {
                tracing::info!("No remote credentials configured, running offline");
                (None, None)
            }
        };

        let backend =
            services::select_backend(&config, storage.clone(), gateway.clone(), clock).await?;
        let progress = ProgressStore::new(backend, clock, config.save_debounce);

        Ok(Self {
            config,
            storage,
            session,
            gateway,
            progress,
        })
    }

    /// Session store, or `NotConfigured` when running without a remote.
    pub fn session(&self) -> Result<&Arc<SessionStore>> {
        self.session.as_ref().ok_or(SyncError::NotConfigured)
    }
}
