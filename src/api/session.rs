//! Operator view of the WhatsApp session.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::{AdminUser, AppState};
use crate::error::ApiError;

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/api/session", get(session_status))
}

/// GET /api/session
///
/// Current session state, including the pending pairing code if any.
async fn session_status(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let Some(session) = &state.session else {
        return Ok(Json(serde_json::json!({ "enabled": false })));
    };

    let mut body = serde_json::to_value(session.status().await)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("enabled".into(), serde_json::Value::Bool(true));
    }
    Ok(Json(body))
}
