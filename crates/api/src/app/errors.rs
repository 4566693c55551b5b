use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stratum_core::AdminError;

pub fn admin_error_to_response(err: AdminError) -> axum::response::Response {
    let status = match &err {
        AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
        AdminError::NotFound => StatusCode::NOT_FOUND,
        AdminError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AdminError::Conflict(_) => StatusCode::CONFLICT,
        AdminError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AdminError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
    };
    json_error(status, err.kind(), err.public_message())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Rejection for a body or query string that did not deserialize.
pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_input", message)
}
