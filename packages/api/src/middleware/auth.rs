use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{auth::UserClaims, error::ApiError, state::AppState};

/// Caller identity, attached to every request by [`auth_middleware`].
#[derive(Debug, Clone)]
pub enum AppUser {
    Authenticated(UserClaims),
    Anonymous,
    /// A token was sent but is malformed, expired or revoked.
    Rejected(String),
}

impl AppUser {
    /// Claims of an authenticated caller; 401 otherwise.
    pub fn require(&self) -> Result<&UserClaims, ApiError> {
        match self {
            AppUser::Authenticated(claims) => Ok(claims),
            AppUser::Anonymous => Err(ApiError::unauthorized("Authentication token is missing")),
            AppUser::Rejected(reason) => Err(ApiError::unauthorized(reason.clone())),
        }
    }

    /// Claims when authenticated. Rejected tokens count as anonymous here.
    pub fn claims(&self) -> Option<&UserClaims> {
        match self {
            AppUser::Authenticated(claims) => Some(claims),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<i32> {
        self.claims().and_then(UserClaims::user_id)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// `None` when no header is present, `Some(Err)` when it is unusable.
fn bearer_token(headers: &HeaderMap) -> Option<Result<&str, &'static str>> {
    let value = headers.get(AUTHORIZATION)?;
    let Ok(value) = value.to_str() else {
        return Some(Err("Invalid token format"));
    };
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    Some(token.ok_or("Invalid token format"))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match bearer_token(request.headers()) {
        None => AppUser::Anonymous,
        Some(Err(reason)) => AppUser::Rejected(reason.to_string()),
        Some(Ok(token)) => match state.tokens.verify(token) {
            Ok(claims) => AppUser::Authenticated(claims),
            Err(e) => {
                tracing::debug!("Rejected bearer token: {}", e);
                AppUser::Rejected(e.to_string())
            }
        },
    };

    request.extensions_mut().insert::<AppUser>(user);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_bearer_header() {
        assert!(bearer_token(&HeaderMap::new()).is_none());
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some(Ok("abc.def")));
        assert_eq!(bearer_token(&headers("Bearer   ")), Some(Err("Invalid token format")));
        assert_eq!(bearer_token(&headers("Token abc")), Some(Err("Invalid token format")));
    }

    #[test]
    fn require_distinguishes_missing_and_rejected() {
        let err = AppUser::Anonymous.require().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);

        let err = AppUser::Rejected("Token has been revoked".into())
            .require()
            .unwrap_err();
        assert_eq!(err.message(), Some("Token has been revoked"));
        assert!(AppUser::Rejected("x".into()).claims().is_none());
    }
}
