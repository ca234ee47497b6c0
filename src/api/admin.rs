//! Admin-only catalog endpoints: users, roles, letter types and settings.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use super::auth::{hash, required, validate_email};
use super::{AdminUser, ApiJson, AppState, parse_id};
use crate::accounts::{NewAccount, Role, RoleRecord};
use crate::error::ApiError;
use crate::letters::LetterType;
use crate::notifications::{NewPreference, PreferenceUpdate};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/roles", get(list_roles).post(create_role))
        .route(
            "/api/roles/{id}",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route(
            "/api/letter_types",
            get(list_letter_types).post(create_letter_type),
        )
        .route(
            "/api/letter_types/{id}",
            get(get_letter_type)
                .put(update_letter_type)
                .delete(delete_letter_type),
        )
        .route("/api/settings", get(list_settings).post(create_setting))
        .route(
            "/api/settings/{id}",
            get(get_setting).put(update_setting).delete(delete_setting),
        )
}

fn deleted(entity: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": format!("{entity} deleted") }))
}

// ── Users ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub role_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Required on create; on update an empty password keeps the old one.
    #[serde(default)]
    pub password: String,
}

async fn require_role(state: &AppState, role_id: i64) -> Result<RoleRecord, ApiError> {
    state
        .store
        .get_role(role_id)
        .await?
        .ok_or_else(|| ApiError::Validation(format!("Role {role_id} does not exist")))
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_accounts().await?))
}

async fn create_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(input): ApiJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    let role = require_role(&state, input.role_id).await?;
    let name = required("name", &input.name)?;
    let email = validate_email(&input.email)?;
    let password = required("password", &input.password)?;

    if state.store.get_account_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("Email is already registered".into()));
    }

    let account = state
        .store
        .create_account(&NewAccount {
            role_id: role.id,
            name,
            email,
            password_hash: hash(password).await?,
        })
        .await?;
    info!(account_id = account.id, role = %role.name, "Account created by admin");
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let account = state
        .store
        .get_account(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;
    Ok(Json(account))
}

async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let mut account = state
        .store
        .get_account(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    let role = require_role(&state, input.role_id).await?;
    account.role_id = role.id;
    account.role = role;
    account.name = required("name", &input.name)?;
    account.email = validate_email(&input.email)?;
    if !input.password.is_empty() {
        account.password_hash = hash(input.password).await?;
    }

    state.store.update_account(&account).await?;
    let account = state
        .store
        .get_account(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;
    Ok(Json(account))
}

async fn delete_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete_account(id).await? {
        return Err(ApiError::not_found("User", id));
    }
    info!(account_id = id, "Account deleted");
    Ok(deleted("User"))
}

// ── Roles ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    #[serde(default)]
    pub name: String,
}

impl RoleInput {
    fn role(&self) -> Result<Role, ApiError> {
        self.name.trim().parse::<Role>().map_err(ApiError::Validation)
    }
}

async fn list_roles(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_roles().await?))
}

async fn create_role(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(input): ApiJson<RoleInput>,
) -> Result<impl IntoResponse, ApiError> {
    let name = input.role()?;
    if state.store.get_role_by_name(name).await?.is_some() {
        return Err(ApiError::Conflict(format!("Role {name} already exists")));
    }
    let role = state.store.create_role(name).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn get_role(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let role = state
        .store
        .get_role(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Role", id))?;
    Ok(Json(role))
}

async fn update_role(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<RoleInput>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let mut role = state
        .store
        .get_role(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Role", id))?;
    role.name = input.role()?;
    state.store.update_role(&role).await?;
    Ok(Json(role))
}

async fn delete_role(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete_role(id).await? {
        return Err(ApiError::not_found("Role", id));
    }
    Ok(deleted("Role"))
}

// ── Letter types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LetterTypeInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

async fn list_letter_types(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_letter_types().await?))
}

async fn create_letter_type(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(input): ApiJson<LetterTypeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &input.name)?;
    let letter_type = state
        .store
        .create_letter_type(&name, input.description.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(letter_type)))
}

async fn get_letter_type(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let letter_type = state
        .store
        .get_letter_type(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Letter type", id))?;
    Ok(Json(letter_type))
}

async fn update_letter_type(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<LetterTypeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state
        .store
        .get_letter_type(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Letter type", id))?;
    let letter_type = LetterType {
        id,
        name: required("name", &input.name)?,
        description: input.description.trim().to_string(),
    };
    state.store.update_letter_type(&letter_type).await?;
    Ok(Json(letter_type))
}

async fn delete_letter_type(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete_letter_type(id).await? {
        return Err(ApiError::not_found("Letter type", id));
    }
    Ok(deleted("Letter type"))
}

// ── Settings (notification preferences) ─────────────────────────────────

async fn list_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_preferences().await?))
}

async fn create_setting(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(input): ApiJson<NewPreference>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_account(input.user_id)
        .await?
        .ok_or_else(|| ApiError::Validation(format!("User {} does not exist", input.user_id)))?;

    if let Some(existing) = state.store.get_preference_for_user(input.user_id).await? {
        return Err(ApiError::Conflict(format!(
            "Setting {} already exists for user {}",
            existing.id, input.user_id
        )));
    }

    let pref = state.store.create_preference(&input).await?;
    info!(setting_id = pref.id, user_id = pref.user_id, "Notification setting created");
    Ok((StatusCode::CREATED, Json(pref)))
}

async fn get_setting(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let pref = state
        .store
        .get_preference(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Setting", id))?;
    Ok(Json(pref))
}

async fn update_setting(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<PreferenceUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let mut pref = state
        .store
        .get_preference(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Setting", id))?;

    pref.telegram_chat_id = input.telegram_chat_id.trim().to_string();
    pref.wa_number = input.wa_number.trim().to_string();
    pref.allow_telegram = input.allow_telegram;
    pref.allow_wa = input.allow_wa;
    state.store.update_preference(&pref).await?;

    let pref = state
        .store
        .get_preference(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Setting", id))?;
    Ok(Json(pref))
}

async fn delete_setting(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete_preference(id).await? {
        return Err(ApiError::not_found("Setting", id));
    }
    Ok(deleted("Setting"))
}
