// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process stand-in for the auth and REST endpoints.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lingua_sync::config::RemoteConfig;
use lingua_sync::db::DurableStore;
use lingua_sync::services::{AuthClient, RestGateway, SessionStore};
use lingua_sync::time_utils::Clock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ANON_KEY: &str = "anon-key";
pub const USER_ID: &str = "user-1";
pub const EMAIL: &str = "learner@example.com";
pub const PASSWORD: &str = "correct horse";
pub const OTHER_USER_ID: &str = "user-2";
pub const OTHER_EMAIL: &str = "friend@example.com";

fn user_for(email: &str) -> (&'static str, &'static str) {
    if email == OTHER_EMAIL {
        (OTHER_USER_ID, OTHER_EMAIL)
    } else {
        (USER_ID, EMAIL)
    }
}

/// Observable and tweakable server state.
pub struct MockState {
    pub refresh_calls: AtomicUsize,
    pub rest_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    /// `expires_in` handed out with every new token
    pub token_ttl_secs: AtomicI64,
    /// Answer every REST call with 401
    pub reject_all: AtomicBool,
    /// Answer refresh requests with 400
    pub reject_refresh: AtomicBool,
    /// Accept sign-ups without returning a session
    pub require_confirmation: AtomicBool,
    /// Status forced onto the next upserts
    pub upsert_failure: Mutex<Option<u16>>,
    issued: AtomicUsize,
    current_token: Mutex<String>,
    /// Owner of `current_token` as `(id, email)`
    current_user: Mutex<(&'static str, &'static str)>,
    /// Rows keyed by `user_id`
    pub rows: Mutex<HashMap<String, Value>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            rest_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            token_ttl_secs: AtomicI64::new(3600),
            reject_all: AtomicBool::new(false),
            reject_refresh: AtomicBool::new(false),
            require_confirmation: AtomicBool::new(false),
            upsert_failure: Mutex::new(None),
            issued: AtomicUsize::new(0),
            current_token: Mutex::new(String::new()),
            current_user: Mutex::new((USER_ID, EMAIL)),
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl MockState {
    /// Invalidate the current access token without telling the client.
    pub fn revoke_current_token(&self) {
        self.current_token.lock().unwrap().clear();
    }

    pub fn current_token(&self) -> String {
        self.current_token.lock().unwrap().clone()
    }

    pub fn stored_state(&self, user_id: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(user_id)
            .and_then(|row| row.get("state").cloned())
    }

    fn issue(&self, user: (&'static str, &'static str)) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        *self.current_token.lock().unwrap() = access.clone();
        *self.current_user.lock().unwrap() = user;
        json!({
            "access_token": access,
            "refresh_token": format!("refresh-{n}"),
            "expires_in": self.token_ttl_secs.load(Ordering::SeqCst),
            "token_type": "bearer",
            "user": { "id": user.0, "email": user.1 },
        })
    }

    fn refresh_user(&self) -> (&'static str, &'static str) {
        *self.current_user.lock().unwrap()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all.load(Ordering::SeqCst) {
            return false;
        }
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let current = self.current_token.lock().unwrap();
        matches!(token, Some(t) if !current.is_empty() && t == current.as_str())
    }
}

pub struct MockServer {
    pub url: String,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/auth/v1/signup", post(signup))
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/logout", post(logout))
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/health", get(|| async { StatusCode::OK }))
            .route(
                "/rest/v1/{table}",
                get(select_rows).post(upsert_rows).delete(delete_rows),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            url: self.url.clone(),
            anon_key: ANON_KEY.to_string(),
        }
    }

    pub async fn session_store(&self, storage: Arc<dyn DurableStore>) -> Arc<SessionStore> {
        let client = AuthClient::new(reqwest::Client::new(), &self.remote_config());
        SessionStore::open(client, storage, Clock::default()).await
    }

    pub fn gateway(&self, session: Arc<SessionStore>) -> RestGateway {
        RestGateway::new(reqwest::Client::new(), &self.remote_config(), session)
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error_description": message }))).into_response()
}

async fn signup(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
    let user = user_for(email);
    if state.require_confirmation.load(Ordering::SeqCst) {
        return Json(json!({ "id": user.0, "email": email })).into_response();
    }
    Json(state.issue(user)).into_response()
}

async fn token(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    match query.get("grant_type").map(String::as_str) {
        Some("password") => {
            let password = body.get("password").and_then(Value::as_str);
            let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
            if password == Some(PASSWORD) {
                Json(state.issue(user_for(email))).into_response()
            } else {
                error_body(StatusCode::BAD_REQUEST, "Invalid login credentials")
            }
        }
        Some("refresh_token") => {
            state.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if state.reject_refresh.load(Ordering::SeqCst) {
                return error_body(StatusCode::BAD_REQUEST, "Invalid Refresh Token");
            }
            let user = state.refresh_user();
            Json(state.issue(user)).into_response()
        }
        _ => error_body(StatusCode::BAD_REQUEST, "unsupported grant_type"),
    }
}

async fn logout(State(state): State<Arc<MockState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    state.revoke_current_token();
    StatusCode::NO_CONTENT
}

async fn user(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "invalid JWT");
    }
    let (id, email) = state.refresh_user();
    Json(json!({ "id": id, "email": email })).into_response()
}

fn user_filter(query: &HashMap<String, String>) -> Option<String> {
    query
        .get("user_id")
        .and_then(|v| v.strip_prefix("eq."))
        .map(str::to_string)
}

async fn select_rows(
    State(state): State<Arc<MockState>>,
    Path(_table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.rest_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "JWT expired");
    }
    let rows = state.rows.lock().unwrap();
    let matching: Vec<Value> = user_filter(&query)
        .and_then(|id| rows.get(&id))
        .map(|row| json!({ "state": row["state"] }))
        .into_iter()
        .collect();
    Json(Value::Array(matching)).into_response()
}

async fn upsert_rows(
    State(state): State<Arc<MockState>>,
    Path(_table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.rest_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "JWT expired");
    }
    if let Some(code) = *state.upsert_failure.lock().unwrap() {
        let status = StatusCode::from_u16(code).unwrap();
        return (status, Json(json!({ "message": "violates row-level security policy" })))
            .into_response();
    }

    let owner = state.refresh_user().0;
    let rows_in = body.as_array().cloned().unwrap_or_default();
    if rows_in
        .iter()
        .any(|row| row.get("user_id").and_then(Value::as_str) != Some(owner))
    {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "new row violates row-level security policy" })),
        )
            .into_response();
    }

    let mut rows = state.rows.lock().unwrap();
    for row in rows_in {
        if let Some(user_id) = row.get("user_id").and_then(Value::as_str) {
            rows.insert(user_id.to_string(), row.clone());
        }
    }
    StatusCode::CREATED.into_response()
}

async fn delete_rows(
    State(state): State<Arc<MockState>>,
    Path(_table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.rest_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "JWT expired");
    }
    let removed = user_filter(&query).and_then(|id| state.rows.lock().unwrap().remove(&id));
    match removed {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
    .into_response()
}
