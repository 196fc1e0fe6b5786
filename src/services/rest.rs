// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorized client for the `/rest/v1` relational API.

use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use crate::services::auth::SessionStore;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Column-equality filter (`column=eq.value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    column: String,
    value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    fn to_query(&self) -> (String, String) {
        (self.column.clone(), format!("eq.{}", self.value))
    }
}

/// What an upsert sends back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnPolicy {
    #[default]
    Minimal,
    Representation,
}

impl ReturnPolicy {
    fn as_prefer(self) -> &'static str {
        match self {
            ReturnPolicy::Minimal => "return=minimal",
            ReturnPolicy::Representation => "return=representation",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    /// Comma-separated columns that identify a conflicting row
    pub on_conflict: Option<String>,
    pub returning: ReturnPolicy,
}

/// One REST call, kept whole so it can be sent again after a refresh.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn filters(mut self, filters: &[Filter]) -> Self {
        self.query.extend(filters.iter().map(Filter::to_query));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// REST client that attaches the session's bearer token to every call.
#[derive(Clone)]
pub struct RestGateway {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Arc<SessionStore>,
}

impl RestGateway {
    pub fn new(http: reqwest::Client, remote: &RemoteConfig, session: Arc<SessionStore>) -> Self {
        Self {
            http,
            base_url: format!("{}/rest/v1", remote.url),
            anon_key: remote.anon_key.clone(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Send `request` to `path` with the current session's token.
    ///
    /// A 401 triggers one forced refresh and one retry. Whatever the retry
    /// returns, including a second 401, goes back to the caller.
    pub async fn authorized_request(
        &self,
        path: &str,
        request: &RestRequest,
    ) -> Result<reqwest::Response> {
        let session = self
            .session
            .valid_session()
            .await?
            .ok_or(SyncError::AuthenticationRequired)?;

        let response = self.send(path, request, &session.access_token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(path, "Request unauthorized, refreshing session and retrying once");
        let renewed = self.session.force_refresh(&session.access_token).await?;
        self.send(path, request, &renewed.access_token).await
    }

    async fn send(
        &self,
        path: &str,
        request: &RestRequest,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    // ─── Table primitives ────────────────────────────────────────

    /// Read rows matching `filters`, projecting `columns`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
        columns: &str,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let mut request = RestRequest::new(Method::GET)
            .query("select", columns)
            .filters(filters)
            .header("Accept", "application/json");
        if let Some(limit) = limit {
            request = request.query("limit", limit.to_string());
        }

        let response = self.authorized_request(&table_path(table), &request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Insert `rows`, updating rows that conflict on `options.on_conflict`.
    ///
    /// Returns the stored rows when `ReturnPolicy::Representation` is asked for.
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        rows: &[T],
        options: &UpsertOptions,
    ) -> Result<Vec<Value>> {
        if rows.is_empty() {
            return Err(SyncError::NoRows);
        }

        let mut request = RestRequest::new(Method::POST)
            .header(
                "Prefer",
                format!("{},resolution=merge-duplicates", options.returning.as_prefer()),
            )
            .body(serde_json::to_value(rows)?);
        if let Some(columns) = &options.on_conflict {
            request = request.query("on_conflict", columns.clone());
        }

        let response = self.authorized_request(&table_path(table), &request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(table, status = %status, "Upsert rejected");
            return Err(SyncError::UpsertFailed {
                status: status.as_u16(),
                body,
            });
        }

        match options.returning {
            ReturnPolicy::Minimal => Ok(Vec::new()),
            ReturnPolicy::Representation => Ok(serde_json::from_str(&body).unwrap_or_default()),
        }
    }

    /// Patch rows matching `filters`.
    pub async fn update(&self, table: &str, filters: &[Filter], patch: &Value) -> Result<()> {
        let request = RestRequest::new(Method::PATCH)
            .filters(filters)
            .header("Prefer", "return=minimal")
            .body(patch.clone());

        let response = self.authorized_request(&table_path(table), &request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(SyncError::RequestFailed {
            status: status.as_u16(),
            body: response.text().await?,
        })
    }

    /// Delete rows matching `filters`. A 404 counts as already deleted.
    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        let request = RestRequest::new(Method::DELETE)
            .filters(filters)
            .header("Prefer", "return=minimal");

        let response = self.authorized_request(&table_path(table), &request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(SyncError::RequestFailed {
            status: status.as_u16(),
            body: response.text().await?,
        })
    }
}

fn table_path(table: &str) -> String {
    format!("/{}", urlencoding::encode(table))
}
