use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::ConnectionEvent;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::is_authorized;
use crate::api::response::{error_json, error_json_with, unauthorized};
use crate::gateway::Gateway;

const VALID_ACTIONS: &[&str] = &["ban", "unban", "status", "check"];

pub async fn security_status(
    State(gateway): State<Arc<Gateway>>,
    headers: axum::http::HeaderMap,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    let ledger = &gateway.ledger;
    let thresholds = ledger.thresholds();

    Json(json!({
        "bannedIps": ledger.banned_ips().iter().map(IpAddr::to_string).collect::<Vec<_>>(),
        "trackedCount": ledger.tracked_count(),
        "thresholds": {
            "maxAttempts": thresholds.max_attempts,
            "windowSecs": thresholds.window.as_secs(),
            "permanent": thresholds.permanent,
            "authTolerance": thresholds.auth_tolerance,
            "graceSecs": thresholds.grace.as_secs(),
            "gcSecs": thresholds.gc.as_secs(),
        },
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct SecurityActionBody {
    action: String,
    ip: Option<String>,
}

pub async fn security_action(
    State(gateway): State<Arc<Gateway>>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<SecurityActionBody>,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    if !VALID_ACTIONS.contains(&payload.action.as_str()) {
        return error_json_with(
            StatusCode::BAD_REQUEST,
            "InvalidAction",
            "unrecognized action",
            json!({ "validActions": VALID_ACTIONS }),
        )
        .into_response();
    }

    let ip: IpAddr = match payload.ip.as_deref().map(str::parse) {
        Some(Ok(ip)) => ip,
        Some(Err(_)) => {
            return error_json(StatusCode::BAD_REQUEST, "InvalidIp", "ip is not a valid address")
                .into_response()
        }
        None => {
            return error_json(StatusCode::BAD_REQUEST, "MissingIp", "ip is required for this action")
                .into_response()
        }
    };

    let ledger = &gateway.ledger;
    match payload.action.as_str() {
        "ban" => {
            ledger.ban(ip);
            Json(json!({ "action": "ban", "ip": ip.to_string(), "banned": true })).into_response()
        }
        "unban" => {
            let was_banned = ledger.unban(ip);
            Json(json!({ "action": "unban", "ip": ip.to_string(), "wasActuallyBanned": was_banned }))
                .into_response()
        }
        "status" | "check" => {
            let status = ledger.auto_ban_status(ip);
            Json(json!({
                "action": payload.action,
                "ip": ip.to_string(),
                "isBanned": ledger.is_banned(ip),
                "inGrace": status.in_grace,
                "graceRemainingSecs": status.grace_remaining_secs,
                "attempts": status.attempts,
                "firstAttemptSecsAgo": status.first_attempt_secs_ago,
                "lastAttemptSecsAgo": status.last_attempt_secs_ago,
                "wouldAutoBan": status.would_auto_ban,
                "reason": status.reason,
            }))
            .into_response()
        }
        _ => unreachable!("validated above"),
    }
}

pub async fn cleanup_connections(
    State(gateway): State<Arc<Gateway>>,
    headers: axum::http::HeaderMap,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    let before = gateway.registry.len();
    let removed = gateway.registry.sweep(&gateway.log, &gateway.ledger).await;
    let after = gateway.registry.len();

    Json(json!({
        "connectionsBefore": before,
        "connectionsAfter": after,
        "removed": removed,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct ConnectionLogsQuery {
    #[serde(rename = "eventType")]
    event_type: Option<String>,
    #[serde(rename = "clientName")]
    client_name: Option<String>,
    limit: Option<usize>,
}

pub async fn connection_logs(
    State(gateway): State<Arc<Gateway>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<ConnectionLogsQuery>,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    let event_type = match query.event_type.as_deref() {
        Some("CONNECT") => Some(ConnectionEvent::Connect),
        Some("DISCONNECT") => Some(ConnectionEvent::Disconnect),
        Some(_) => {
            return error_json(
                StatusCode::BAD_REQUEST,
                "InvalidEventType",
                "eventType must be CONNECT or DISCONNECT",
            )
            .into_response()
        }
        None => None,
    };

    let entries = gateway
        .log
        .filter(event_type, query.client_name.as_deref(), query.limit);
    let stats = gateway.log.statistics();

    Json(json!({
        "entries": entries,
        "statistics": stats,
    }))
    .into_response()
}

pub async fn clear_connection_logs(
    State(gateway): State<Arc<Gateway>>,
    headers: axum::http::HeaderMap,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    gateway.log.clear();
    Json(json!({ "cleared": true })).into_response()
}
