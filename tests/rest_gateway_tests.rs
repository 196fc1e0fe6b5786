// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! REST gateway authorization and table primitives.

use lingua_sync::db::MemoryStore;
use lingua_sync::error::SyncError;
use lingua_sync::services::{Filter, ReturnPolicy, UpsertOptions};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

mod common;
use common::{MockServer, EMAIL, PASSWORD, USER_ID};

const TABLE: &str = "user_progress";

fn by_user() -> UpsertOptions {
    UpsertOptions {
        on_conflict: Some("user_id".to_string()),
        ..UpsertOptions::default()
    }
}

#[tokio::test]
async fn test_requests_without_session_are_refused_locally() {
    let server = MockServer::start().await;
    let gateway = server.gateway(server.session_store(Arc::new(MemoryStore::new())).await);

    let err = gateway
        .select::<Value>(TABLE, &[], "*", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationRequired));
    assert_eq!(server.state.rest_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upsert_then_select() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session);

    let row = json!({ "user_id": USER_ID, "state": { "xp": 12 } });
    let returned = gateway.upsert(TABLE, &[row], &by_user()).await.unwrap();
    assert!(returned.is_empty());

    let rows: Vec<Value> = gateway
        .select(TABLE, &[Filter::eq("user_id", USER_ID)], "state", Some(1))
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({ "state": { "xp": 12 } })]);

    let none: Vec<Value> = gateway
        .select(TABLE, &[Filter::eq("user_id", "someone-else")], "state", None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_unauthorized_request_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session.clone());

    server.state.revoke_current_token();
    let rows: Vec<Value> = gateway
        .select(TABLE, &[Filter::eq("user_id", USER_ID)], "state", None)
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert_eq!(server.state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.rest_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.snapshot().unwrap().access_token, "access-2");
}

#[tokio::test]
async fn test_second_unauthorized_is_surfaced() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session);

    server.state.reject_all.store(true, Ordering::SeqCst);
    let err = gateway
        .select::<Value>(TABLE, &[], "state", None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(err.is_auth_error());
    assert_eq!(server.state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.rest_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_upsert_requires_rows() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session);

    let rows: Vec<Value> = Vec::new();
    let err = gateway.upsert(TABLE, &rows, &by_user()).await.unwrap_err();
    assert!(matches!(err, SyncError::NoRows));
    assert_eq!(server.state.rest_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_upsert_carries_status_and_body() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session);

    *server.state.upsert_failure.lock().unwrap() = Some(403);
    let options = UpsertOptions {
        returning: ReturnPolicy::Representation,
        ..by_user()
    };
    let err = gateway
        .upsert(TABLE, &[json!({ "user_id": USER_ID, "state": {} })], &options)
        .await
        .unwrap_err();

    match err {
        SyncError::UpsertFailed { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("row-level security"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_of_missing_rows_is_ok() {
    let server = MockServer::start().await;
    let session = server.session_store(Arc::new(MemoryStore::new())).await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let gateway = server.gateway(session);

    gateway
        .delete(TABLE, &[Filter::eq("user_id", USER_ID)])
        .await
        .unwrap();
}
