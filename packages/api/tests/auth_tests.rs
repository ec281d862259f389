//! Account lifecycle against an in-memory SQLite database.

mod common;

use std::sync::Arc;

use axum::{Router, http::StatusCode};
use common::*;
use neuroscan_api::{
    database,
    entity::{audit_log, user},
    repository::{InMemoryPredictionRepository, SeaOrmPredictionRepository},
    sea_orm::{
        ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
        PaginatorTrait, QueryFilter,
    },
};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app_with_db() -> (Router, DatabaseConnection) {
    let db = database::connect("sqlite::memory:").await.unwrap();
    let (adapter, _) = fixed_adapter(vec![0.05, 0.90, 0.03, 0.02]);
    let repository = Arc::new(SeaOrmPredictionRepository::new(db.clone()));
    let app = router(test_config(), adapter, repository, Some(db.clone()));
    (app, db)
}

fn registration(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "password": "correct-horse",
        "fullName": "Test User",
    })
}

async fn send(app: &Router, request: axum::http::Request<axum::body::Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/auth/login",
            json!({ "username": username, "password": password }),
            None,
        ),
    )
    .await
}

#[tokio::test]
async fn register_login_verify_logout() {
    let (app, db) = app_with_db().await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            registration("radiologist", "Rad@Example.com"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "radiologist");
    assert_eq!(body["email"], "rad@example.com");

    let (status, body) = login(&app, "radiologist", "correct-horse").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful!");
    assert_eq!(body["user"]["username"], "radiologist");
    assert_eq!(body["user"]["role"], "user");
    let token = body["token"].as_str().unwrap().to_string();

    let stored = user::Entity::find()
        .filter(user::Column::Username.eq("radiologist"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_login.is_some());
    assert_ne!(stored.password_hash, "correct-horse");

    let (status, body) = send(&app, get_request("/api/auth/verify", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user"]["id"], stored.id);

    let (status, body) = send(
        &app,
        json_request("POST", "/api/auth/logout", json!({}), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");

    let (status, body) = send(&app, get_request("/api/auth/verify", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let actions = audit_log::Entity::find().count(&db).await.unwrap();
    assert_eq!(actions, 3);
}

#[tokio::test]
async fn duplicates_conflict() {
    let (app, _db) = app_with_db().await;
    let (status, _) = send(
        &app,
        json_request("POST", "/api/auth/register", registration("alice", "alice@example.com"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        json_request("POST", "/api/auth/register", registration("alice", "other@example.com"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "Username already exists");

    let (status, body) = send(
        &app,
        json_request("POST", "/api/auth/register", registration("alice2", "alice@example.com"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "Email already registered");
}

#[tokio::test]
async fn bad_credentials_and_deactivated_accounts() {
    let (app, db) = app_with_db().await;
    send(
        &app,
        json_request("POST", "/api/auth/register", registration("bob", "bob@example.com"), None),
    )
    .await;

    let (status, body) = login(&app, "bob", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid username or password");

    let (status, _) = login(&app, "nobody", "correct-horse").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = login(&app, "bob", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bob = user::Entity::find()
        .filter(user::Column::Username.eq("bob"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let mut active: user::ActiveModel = bob.into();
    active.is_active = Set(false);
    active.update(&db).await.unwrap();

    let (status, body) = login(&app, "bob", "correct-horse").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"]["message"],
        "Account is deactivated. Please contact support."
    );
}

#[tokio::test]
async fn invalid_registration_is_a_bad_request() {
    let (app, _db) = app_with_db().await;
    let (status, body) = send(
        &app,
        json_request("POST", "/api/auth/register", registration("ab", "ab@example.com"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "Username must be at least 3 characters long"
    );

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            json!({ "username": "carol", "email": "carol@example.com" }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "password is required");
}

#[tokio::test]
async fn accounts_need_a_database() {
    let (adapter, _) = fixed_adapter(vec![0.05, 0.90, 0.03, 0.02]);
    let app = router(
        test_config(),
        adapter,
        Arc::new(InMemoryPredictionRepository::new(10)),
        None,
    );

    let (status, body) = send(
        &app,
        json_request("POST", "/api/auth/register", registration("dave", "dave@example.com"), None),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn authenticated_history_is_scoped_to_the_caller() {
    let (app, _db) = app_with_db().await;
    send(
        &app,
        json_request("POST", "/api/auth/register", registration("erin", "erin@example.com"), None),
    )
    .await;
    let (_, body) = login(&app, "erin", "correct-horse").await;
    let token = body["token"].as_str().unwrap().to_string();

    let scan = png(128, 128);
    let mut own = multipart_request("/api/predict", &[("image", "mine.png", &scan)]);
    own.headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let (status, _) = send(&app, own).await;
    assert_eq!(status, StatusCode::OK);

    let anonymous = multipart_request("/api/predict", &[("image", "theirs.png", &scan)]);
    let (status, _) = send(&app, anonymous).await;
    assert_eq!(status, StatusCode::OK);

    let (_, mine) = send(&app, get_request("/api/predictions/history", Some(&token))).await;
    assert_eq!(mine["total_predictions"], 1);
    assert_eq!(mine["recent_predictions"][0]["filename"], "mine.png");

    let (_, everyone) = send(&app, get_request("/api/predictions/history", None)).await;
    assert_eq!(everyone["total_predictions"], 2);

    let (_, stats) = send(&app, get_request("/api/results/statistics", Some(&token))).await;
    assert_eq!(stats["total_predictions"], 1);
}
