use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(record_unit).get(list_units))
}

pub async fn record_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::RecordUnitRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    match services
        .catalog
        .record_unit(principal.identity(), &body.serial, body.note.as_deref())
        .await
    {
        Ok(unit) => (StatusCode::CREATED, Json(unit)).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

pub async fn list_units(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    params: Result<Query<dto::ListParams>, QueryRejection>,
) -> axum::response::Response {
    let query = match params.map_err(|rejection| errors::bad_request(rejection.body_text())) {
        Ok(Query(params)) => params.to_query(),
        Err(res) => return res,
    };
    let query = match query {
        Ok(query) => query,
        Err(e) => return errors::admin_error_to_response(e),
    };

    match services.catalog.list_units(principal.identity(), query).await {
        Ok(items) => Json(dto::Items { items }).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}
