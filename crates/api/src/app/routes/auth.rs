use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::post,
};

use stratum_auth::TokenPair;
use stratum_core::AdminError;
use stratum_infra::LOGIN_FAILED;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;
use crate::middleware::{REFRESH_COOKIE, extract_cookie};

/// Routes that exchange credentials for tokens.
pub fn gated_router() -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    match services.sessions.login(&body.email, &body.password).await {
        Ok(pair) => token_response(pair),
        Err(AdminError::Unauthorized) => errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", LOGIN_FAILED),
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// Refresh token from the body, else from the refresh cookie.
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Option<Json<dto::RefreshRequest>>,
) -> axum::response::Response {
    let from_body = body.and_then(|Json(b)| b.refresh_token).filter(|t| !t.is_empty());
    let Some(token) = from_body.or_else(|| extract_cookie(&headers, REFRESH_COOKIE).map(str::to_string)) else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing refresh token");
    };

    match services.sessions.refresh(&token).await {
        Ok(pair) => token_response(pair),
        Err(e) => errors::admin_error_to_response(e),
    }
}

pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ChangePasswordRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    match services
        .sessions
        .change_password(principal.identity(), &body.current_password, &body.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// The pair as JSON, with the refresh token also set as an HttpOnly cookie.
fn token_response(pair: TokenPair) -> axum::response::Response {
    let cookie = format!("{REFRESH_COOKIE}={}; HttpOnly; Path=/; SameSite=Strict", pair.refresh_token);
    let mut res = (StatusCode::OK, Json(pair)).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            res.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!(error = %e, "refresh cookie not representable as a header"),
    }
    res
}
