use std::sync::LazyLock;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    routing::{get, post},
};
use chrono::Utc;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::{
    auth::{hash_password, verify_password},
    entity::{audit_log, user},
    error::ApiError,
    middleware::auth::AppUser,
    routes::ClientAddr,
    state::AppState,
};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
});
static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_ROLE: &str = "user";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify))
        .route("/logout", post(logout))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "fullName")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Account fields after trimming and validation.
#[derive(Debug, Clone, PartialEq)]
struct NewAccount {
    username: String,
    email: String,
    password: String,
    full_name: String,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", field)))
}

impl RegisterRequest {
    fn validate(self) -> Result<NewAccount, ApiError> {
        let username = required(self.username, "username")?.trim().to_string();
        let email = required(self.email, "email")?.trim().to_lowercase();
        let password = required(self.password, "password")?;
        let full_name = required(self.full_name, "full_name")?.trim().to_string();

        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(ApiError::bad_request(format!(
                "Username must be at least {} characters long",
                MIN_USERNAME_LEN
            )));
        }
        if !USERNAME_REGEX.is_match(&username) {
            return Err(ApiError::bad_request(
                "Username can only contain letters, numbers, and underscores",
            ));
        }
        if !EMAIL_REGEX.is_match(&email) {
            return Err(ApiError::bad_request("Invalid email format"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }

        Ok(NewAccount {
            username,
            email,
            password,
            full_name,
        })
    }
}

/// Best-effort audit trail; failures are logged and swallowed.
async fn audit(
    db: &DatabaseConnection,
    user_id: Option<i32>,
    username: &str,
    action: &str,
    client_addr: Option<String>,
    headers: &HeaderMap,
    details: Option<Value>,
) {
    let entry = audit_log::ActiveModel {
        id: NotSet,
        user_id: Set(user_id),
        username: Set(username.to_string()),
        action: Set(action.to_string()),
        ip_address: Set(client_addr),
        user_agent: Set(headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)),
        details: Set(details),
        created_at: Set(Utc::now()),
    };
    if let Err(e) = entry.insert(db).await {
        tracing::warn!("Failed to write {} audit entry for {}: {}", action, username, e);
    }
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Missing or invalid field"),
        (status = 409, description = "Username or email already taken"),
        (status = 503, description = "No database configured")
    )
)]
#[tracing::instrument(name = "POST /api/auth/register", skip(state, headers, payload))]
pub async fn register(
    State(state): State<AppState>,
    ClientAddr(client_addr): ClientAddr,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let account = payload.validate()?;
    let db = state.db()?;

    let username_taken = user::Entity::find()
        .filter(user::Column::Username.eq(account.username.as_str()))
        .one(db)
        .await?
        .is_some();
    if username_taken {
        return Err(ApiError::conflict("Username already exists"));
    }
    let email_taken = user::Entity::find()
        .filter(user::Column::Email.eq(account.email.as_str()))
        .one(db)
        .await?
        .is_some();
    if email_taken {
        return Err(ApiError::conflict("Email already registered"));
    }

    let cost = state.config.bcrypt_cost;
    let password = account.password.clone();
    let password_hash =
        tokio::task::spawn_blocking(move || hash_password(&password, cost)).await??;

    let created = user::ActiveModel {
        id: NotSet,
        username: Set(account.username.clone()),
        email: Set(account.email.clone()),
        password_hash: Set(password_hash),
        full_name: Set(account.full_name.clone()),
        role: Set(DEFAULT_ROLE.to_string()),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        last_login: Set(None),
    }
    .insert(db)
    .await?;

    audit(
        db,
        Some(created.id),
        &created.username,
        "register",
        client_addr,
        &headers,
        Some(json!({ "email": created.email })),
    )
    .await;
    tracing::info!("Registered user {} ({})", created.username, created.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful! Please login.".to_string(),
            username: created.username,
            email: created.email,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted; bearer token issued", body = LoginResponse),
        (status = 401, description = "Invalid username or password"),
        (status = 403, description = "Account is deactivated"),
        (status = 503, description = "No database configured")
    )
)]
#[tracing::instrument(name = "POST /api/auth/login", skip(state, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    ClientAddr(client_addr): ClientAddr,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (Some(username), Some(password)) = (
        payload.username.filter(|u| !u.trim().is_empty()),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };
    let username = username.trim().to_string();
    let db = state.db()?;

    let account = user::Entity::find()
        .filter(user::Column::Username.eq(username.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    if !account.is_active {
        return Err(ApiError::forbidden(
            "Account is deactivated. Please contact support.",
        ));
    }

    let hash = account.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await??;
    if !matches {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let mut active: user::ActiveModel = account.clone().into();
    active.last_login = Set(Some(Utc::now()));
    active.update(db).await?;

    let (token, _) = state
        .tokens
        .issue(account.id, &account.username, &account.email)?;

    audit(
        db,
        Some(account.id),
        &account.username,
        "login",
        client_addr,
        &headers,
        None,
    )
    .await;
    tracing::info!("User {} logged in", account.username);

    Ok(Json(LoginResponse {
        message: "Login successful!".to_string(),
        token,
        expires_in: state.tokens.ttl_seconds(),
        user: UserInfo {
            id: account.id,
            username: account.username,
            email: account.email,
            full_name: Some(account.full_name),
            role: Some(account.role),
        },
    }))
}

#[utoipa::path(
    get,
    path = "/auth/verify",
    tag = "auth",
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token")
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(name = "GET /api/auth/verify", skip(user))]
pub async fn verify(Extension(user): Extension<AppUser>) -> Result<Json<VerifyResponse>, ApiError> {
    let claims = user.require()?;
    let id = claims
        .user_id()
        .ok_or_else(|| ApiError::unauthorized("Token subject is not a user id"))?;
    Ok(Json(VerifyResponse {
        valid: true,
        user: UserInfo {
            id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            full_name: None,
            role: None,
        },
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out; a presented valid token is revoked", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(name = "POST /api/auth/logout", skip(state, user, headers))]
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    ClientAddr(client_addr): ClientAddr,
    headers: HeaderMap,
) -> Json<MessageResponse> {
    if let Some(claims) = user.claims() {
        state.tokens.revoke(claims);
        if let Some(db) = state.db.as_ref() {
            audit(
                db,
                claims.user_id(),
                &claims.username,
                "logout",
                client_addr,
                &headers,
                None,
            )
            .await;
        }
        tracing::info!("User {} logged out", claims.username);
    }

    Json(MessageResponse {
        message: "Logout successful".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str, full_name: &str) -> RegisterRequest {
        RegisterRequest {
            username: Some(username.into()),
            email: Some(email.into()),
            password: Some(password.into()),
            full_name: Some(full_name.into()),
        }
    }

    #[test]
    fn accepts_and_normalizes_valid_accounts() {
        let account = request(" dr_house ", "House@Example.COM ", "vicodin", " Greg House ")
            .validate()
            .unwrap();
        assert_eq!(account.username, "dr_house");
        assert_eq!(account.email, "house@example.com");
        assert_eq!(account.full_name, "Greg House");
    }

    #[test]
    fn rejects_invalid_fields() {
        let cases = [
            (request("ab", "a@b.io", "secret1", "A"), "at least 3"),
            (request("dr house", "a@b.io", "secret1", "A"), "letters, numbers"),
            (request("drhouse", "not-an-email", "secret1", "A"), "Invalid email"),
            (request("drhouse", "a@b.io", "short", "A"), "at least 6"),
            (request("drhouse", "a@b.io", "secret1", "  "), "full_name is required"),
        ];
        for (req, expected) in cases {
            let err = req.validate().unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert!(
                err.message().unwrap_or_default().contains(expected),
                "{:?} should mention {:?}",
                err.message(),
                expected
            );
        }
    }

    #[test]
    fn accepts_camel_case_full_name() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"username":"nurse_joy","email":"joy@example.com","password":"pokemon","fullName":"Joy"}"#,
        )
        .unwrap();
        assert_eq!(req.full_name.as_deref(), Some("Joy"));
    }
}
