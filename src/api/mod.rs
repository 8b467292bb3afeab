//! HTTP dispatch surface: the admin-facing `/api/forward` call, public
//! health probes, and the admin security/connection-log endpoints.

pub mod admin;
pub mod auth;
pub mod forward;
pub mod health;
pub mod response;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, AllowOrigin, CorsLayer};

use crate::gateway::Gateway;

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let origin = if allow_origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(allow_origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => AllowOrigin::any(),
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    let cors = cors_layer(&gateway.config.http.allow_origin);

    Router::new()
        .route("/api/forward", post(forward::forward))
        .route("/api/health", get(health::health))
        .route("/api/health/{name}", get(health::health_named))
        .route("/api/security-status", get(admin::security_status))
        .route("/api/admin/security", post(admin::security_action))
        .route("/api/cleanup-connections", post(admin::cleanup_connections))
        .route("/api/admin/connection-logs", get(admin::connection_logs))
        .route(
            "/api/admin/connection-logs/clear",
            post(admin::clear_connection_logs),
        )
        .layer(cors)
        .with_state(gateway)
}
