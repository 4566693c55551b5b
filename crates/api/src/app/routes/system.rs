use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The caller's identity, after confirming the principal still exists.
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.sessions.whoami(principal.identity()).await {
        Ok(identity) => Json(dto::WhoAmI::from(identity)).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}
