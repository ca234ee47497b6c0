//! Public endpoints: registration and login.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use super::{ApiJson, AppState};
use crate::accounts::{AccountSummary, NewAccount, Role};
use crate::auth::password::{hash_password_async, verify_password_async};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login))
}

/// POST /api/users/register
///
/// Creates an account with the `user` role.
async fn register(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required("name", &input.name)?;
    let email = validate_email(&input.email)?;
    let password = required("password", &input.password)?;

    let role = state
        .store
        .get_role_by_name(Role::User)
        .await?
        .ok_or_else(|| ApiError::Internal("user role is missing".into()))?;

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
    info!(account_id = account.id, "Account registered");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Registration successful",
            "user": AccountSummary::from(&account),
        })),
    ))
}

/// POST /api/users/login
///
/// Exchanges email and password for a bearer token.
async fn login(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Authentication("Invalid email or password".into());

    let account = state.store.get_account_by_email(input.email.trim()).await?;
    let stored = account.as_ref().map(|a| a.password_hash.clone());
    let verified = verify_password_async(input.password, stored)
        .await
        .map_err(|e| ApiError::Internal(format!("password check failed: {e}")))?;
    let account = match account {
        Some(account) if verified => account,
        _ => return Err(invalid()),
    };

    let token = state.gate.signer().issue(account.id, account.role.name);
    info!(account_id = account.id, role = %account.role.name, "Login succeeded");

    Ok(Json(serde_json::json!({
        "token": token,
        "user": AccountSummary::from(&account),
    })))
}

/// Hash a password without holding up the request runtime.
pub(crate) async fn hash(password: String) -> Result<String, ApiError> {
    hash_password_async(password)
        .await
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

pub(crate) fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub(crate) fn validate_email(raw: &str) -> Result<String, ApiError> {
    let email = required("email", raw)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::Validation(format!("Invalid email: {email}"))),
    }
}
