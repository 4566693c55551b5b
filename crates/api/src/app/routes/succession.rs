use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    response::IntoResponse,
    routing::{get, post},
};

use stratum_core::{NodeId, NodeKind};

use crate::app::{dto, errors, services::AppServices};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/:kind/:id/head", post(replace_head))
        .route("/:kind/:id/successions", get(list_successions))
}

fn node_path(path: Result<Path<(String, i64)>, PathRejection>) -> Result<(NodeKind, NodeId), axum::response::Response> {
    let Path((kind, id)) = path.map_err(|rejection| errors::bad_request(rejection.body_text()))?;
    Ok((dto::parse_node_kind(&kind)?, NodeId::from(id)))
}

pub async fn replace_head(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    path: Result<Path<(String, i64)>, PathRejection>,
    body: Result<Json<dto::ReplaceHeadRequest>, JsonRejection>,
) -> axum::response::Response {
    let (node, node_id) = match node_path(path) {
        Ok(parts) => parts,
        Err(res) => return res,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    match services
        .engine
        .replace_head(principal.identity(), node, node_id, body.into())
        .await
    {
        Ok(succession) => Json(succession).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

pub async fn list_successions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> axum::response::Response {
    let (node, node_id) = match node_path(path) {
        Ok(parts) => parts,
        Err(res) => return res,
    };

    match services.catalog.list_successions(principal.identity(), node, node_id).await {
        Ok(items) => Json(dto::Items { items }).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}
