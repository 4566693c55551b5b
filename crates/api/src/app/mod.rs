//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: service construction over one directory
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and path parsing
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, AppState};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// gate keys clients by peer address.
pub fn build_app(state: AppState) -> Router {
    let auth_state = middleware::AuthState {
        tokens: Arc::clone(&state.tokens),
    };
    let gate_state = middleware::GateState {
        gate: Arc::clone(&state.gate),
        trust_forwarded_for: state.trust_forwarded_for,
    };

    // Credential exchange: counted by the abuse gate, no bearer required.
    let gated = routes::auth::gated_router().layer(axum::middleware::from_fn_with_state(
        gate_state,
        middleware::gate_middleware,
    ));

    // Protected routes: require a verified bearer token.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(gated)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(state.services)))
}
