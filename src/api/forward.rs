use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::GatewayError;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::is_authorized;
use crate::api::response::{error_json_with, unauthorized};
use crate::gateway::Gateway;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequestBody {
    pub client_name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body: String,
}

pub async fn forward(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(payload): Json<ForwardRequestBody>,
) -> Response {
    if !is_authorized(&headers, &gateway.config.auth.admin_key) {
        return unauthorized().into_response();
    }

    let request = codec::Request {
        client_name: payload.client_name.clone(),
        method: payload.method,
        url: payload.url,
        body: payload.body.into_bytes(),
    };

    let result = gateway
        .registry
        .forward_to_named(&payload.client_name, request, &gateway.ledger, &gateway.log)
        .await;

    match result {
        Ok(response) => build_success_response(response),
        Err(GatewayError::NotRegistered(name)) => error_json_with(
            StatusCode::NOT_FOUND,
            "Client not connected",
            "the named agent has no live tunnel",
            json!({ "clientName": name }),
        )
        .into_response(),
        Err(GatewayError::DispatchTimeout) => error_json_with(
            StatusCode::INTERNAL_SERVER_ERROR,
            "timeout",
            "dispatch timed out waiting for the agent's response",
            json!({ "clientName": payload.client_name }),
        )
        .into_response(),
        Err(err @ GatewayError::UnhealthyConnection) => error_json_with(
            StatusCode::INTERNAL_SERVER_ERROR,
            "UnhealthyConnection",
            &err.to_string(),
            json!({ "clientName": payload.client_name }),
        )
        .into_response(),
        Err(err) => error_json_with(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DispatchFailed",
            &err.to_string(),
            json!({ "clientName": payload.client_name }),
        )
        .into_response(),
    }
}

fn build_success_response(response: codec::Response) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);

    let body_text = std::str::from_utf8(&response.body).ok();
    let envelope = body_text.and_then(engine::envelope::parse);

    match envelope {
        Some((headers, bytes)) => {
            let mut builder = Response::builder().status(status);
            for (name, value) in headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::from_str(&value),
                ) {
                    builder = builder.header(name, value);
                }
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        None => Response::builder()
            .status(status)
            .body(Body::from(response.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}
