use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use stratum_auth::Target;

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub async fn create_subordinate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateSubordinateRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    match services.engine.create_subordinate(principal.identity(), body.into()).await {
        Ok(provisioned) => (StatusCode::CREATED, Json(provisioned)).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

pub async fn list_subordinates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(kind): Path<String>,
    params: Result<Query<dto::ListParams>, QueryRejection>,
) -> axum::response::Response {
    let entity = match dto::parse_entity(&kind) {
        Ok(entity) => entity,
        Err(res) => return res,
    };
    let query = match params {
        Ok(Query(params)) => params.to_query(),
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };
    let query = match query {
        Ok(query) => query,
        Err(e) => return errors::admin_error_to_response(e),
    };

    match services.catalog.list_subordinates(principal.identity(), entity, query).await {
        Ok(items) => Json(dto::Items { items }).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

pub async fn remove_subordinate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> axum::response::Response {
    let (kind, id) = match path {
        Ok(Path(parts)) => parts,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };
    let entity = match dto::parse_entity(&kind) {
        Ok(entity) => entity,
        Err(res) => return res,
    };

    match services.engine.remove(principal.identity(), Target::Row { entity, id }).await {
        Ok(removed) => Json(removed).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}
