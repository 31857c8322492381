use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use super::{
    dto::{LoginRequest, LoginResponse, ServiceTokenResponse, TokenRequest, ValidateResponse},
    middleware::AuthUser,
    password::verify_off_thread,
};
use crate::{
    envelope::JsonResponse,
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
    users::dto::{is_valid_email, normalize_email},
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/validate-token", post(validate_token).get(validate_token_query))
}

/// Mounted under `/admin`, behind `require_auth`.
pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/tokens/service", post(service_token))
}

/// Unknown email, wrong password, and inactive account all end in the same
/// `Credential` error, after the same amount of hashing work.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<JsonResponse<LoginResponse>>> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("invalid email".into()));
    }

    let user = state.users.find_by_email(&email).await?;
    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());

    let password_ok = match verify_off_thread(payload.password, stored_hash).await {
        Ok(v) => v,
        Err(AppError::Format(reason)) => {
            error!(email = %email, %reason, "stored password hash is corrupt");
            false
        }
        Err(e) => return Err(e),
    };

    let user = match user {
        Some(u) if password_ok & u.active => u,
        Some(u) => {
            let reason = if password_ok { "inactive user" } else { "wrong password" };
            warn!(user_id = %u.id, reason, "login rejected");
            return Err(AppError::Credential(reason.into()));
        }
        None => {
            warn!(email = %email, "login unknown email");
            return Err(AppError::Credential("unknown email".into()));
        }
    };

    let token = state
        .tokens
        .issue(user.id, state.config.tokens.login_ttl())
        .await?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(JsonResponse::ok(
        format!("logged in as {}", user.email),
        LoginResponse {
            token: token.plaintext.into_inner(),
            expires_at: token.expiry,
            user: user.into(),
        },
    )))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<TokenRequest>,
) -> AppResult<Json<JsonResponse<()>>> {
    state.sessions.logout(&payload.token).await?;
    Ok(Json(JsonResponse::message("logged out")))
}

async fn token_validity(
    state: &AppState,
    token: &str,
) -> AppResult<Json<JsonResponse<ValidateResponse>>> {
    let valid = state.tokens.validate(token).await?;
    Ok(Json(JsonResponse::ok("success", ValidateResponse { valid })))
}

#[instrument(skip(state, payload))]
pub async fn validate_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<TokenRequest>,
) -> AppResult<Json<JsonResponse<ValidateResponse>>> {
    token_validity(&state, &payload.token).await
}

#[instrument(skip(state, query))]
pub async fn validate_token_query(
    State(state): State<AppState>,
    Query(query): Query<TokenRequest>,
) -> AppResult<Json<JsonResponse<ValidateResponse>>> {
    token_validity(&state, &query.token).await
}

/// Short-lived token for scripts acting on behalf of the caller.
#[instrument(skip(state))]
pub async fn service_token(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<JsonResponse<ServiceTokenResponse>>> {
    let token = state
        .tokens
        .issue(user_id, state.config.tokens.service_ttl())
        .await?;
    info!(%user_id, "service token issued");
    Ok(Json(JsonResponse::ok(
        "token issued",
        ServiceTokenResponse {
            token: token.plaintext.into_inner(),
            expires_at: token.expiry,
        },
    )))
}
