use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Local;
use serde_json::json;

use crate::gateway::Gateway;

pub async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let details = gateway.registry.details();
    let names: Vec<String> = details.iter().map(|d| d.name.clone()).collect();
    let connected = details.len();

    let body = json!({
        "status": if connected > 0 { "healthy" } else { "unhealthy" },
        "connectedClients": connected,
        "connectedClientNames": names,
        "clientDetails": details,
        "uptime": gateway_uptime(&gateway),
        "timestamp": Local::now().to_rfc3339(),
    });

    let status = if connected > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}

pub async fn health_named(
    State(gateway): State<Arc<Gateway>>,
    Path(name): Path<String>,
) -> Response {
    let healthy = gateway
        .registry
        .lookup(&name)
        .map(|session| session.socket_healthy())
        .unwrap_or(false);

    if healthy {
        (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "connected": true })),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "disconnected", "connected": false })),
        )
            .into_response()
    }
}

fn gateway_uptime(gateway: &Gateway) -> String {
    format!("{} seconds", gateway.started_at.elapsed().as_secs())
}
