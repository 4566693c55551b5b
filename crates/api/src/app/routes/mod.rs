use axum::{
    Router,
    routing::{delete, get, post},
};

pub mod auth;
pub mod provisioning;
pub mod succession;
pub mod system;
pub mod units;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/auth/password", post(auth::change_password))
        .route("/subordinates", post(provisioning::create_subordinate))
        .route("/subordinates/:kind", get(provisioning::list_subordinates))
        .route("/subordinates/:kind/:id", delete(provisioning::remove_subordinate))
        .nest("/nodes", succession::router())
        .nest("/units", units::router())
}
