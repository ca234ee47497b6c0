//! Letter endpoints. Role rules live in `LetterWorkflow`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::{ApiJson, AppState, AuthUser, parse_id};
use crate::error::ApiError;
use crate::letters::{CreateLetterInput, LetterPatch};

pub fn letter_routes() -> Router<AppState> {
    Router::new()
        .route("/api/letters", get(list_letters).post(create_letter))
        .route(
            "/api/letters/{id}",
            get(get_letter).put(update_letter).delete(delete_letter),
        )
}

async fn create_letter(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    ApiJson(input): ApiJson<CreateLetterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.workflow.create(actor, input).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_letters(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.workflow.list(actor).await?))
}

async fn get_letter(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.workflow.get(id).await?))
}

async fn update_letter(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<LetterPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.workflow.transition(actor, id, patch).await?))
}

async fn delete_letter(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state.workflow.delete(actor, id).await?;
    Ok(Json(serde_json::json!({"message": "Letter deleted"})))
}
