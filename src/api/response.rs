use axum::http::StatusCode;
use axum::Json;
use chrono::Local;
use serde_json::{json, Value};

/// User-visible failures always carry an `error` keyword, a human message,
/// and a machine timestamp. Stack traces never appear here.
pub fn error_json(status: StatusCode, error: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "error": error,
            "message": message,
            "timestamp": Local::now().to_rfc3339(),
        })),
    )
}

/// Same as [`error_json`] but merges in extra fields (e.g. `clientName`).
pub fn error_json_with(
    status: StatusCode,
    error: &str,
    message: &str,
    extra: Value,
) -> (StatusCode, Json<Value>) {
    let mut body = json!({
        "error": error,
        "message": message,
        "timestamp": Local::now().to_rfc3339(),
    });
    if let (Value::Object(base), Value::Object(more)) = (&mut body, extra) {
        base.extend(more);
    }
    (status, Json(body))
}

pub fn unauthorized() -> (StatusCode, Json<Value>) {
    error_json(StatusCode::UNAUTHORIZED, "Unauthorized", "missing or invalid admin key")
}
