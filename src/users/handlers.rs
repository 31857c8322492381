use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        is_valid_email, normalize_email, DeleteUserRequest, PublicUser, RevokedSessions,
        SaveUserRequest, SignupRequest, UserList, MIN_PASSWORD_LEN,
    },
    repo_types::{NewUser, UserUpdate},
};
use crate::{
    auth::{middleware::AuthUser, password::hash_off_thread},
    envelope::JsonResponse,
    error::{AppError, AppResult},
    extract::JsonBody,
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/users/signup", post(signup))
}

/// Mounted under `/admin`, behind `require_auth`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/all", post(all_users).get(all_users))
        .route("/users/get/:id", post(get_user).get(get_user))
        .route("/users/save", post(save_user))
        .route("/users/delete", post(delete_user))
        .route("/users/log-user-out/:id", post(log_user_out))
}

fn check_email(email: &str) -> AppResult<()> {
    if !is_valid_email(email) {
        warn!(email, "invalid email");
        return Err(AppError::Validation("invalid email".into()));
    }
    Ok(())
}

fn check_password(password: &str) -> AppResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> AppResult<(StatusCode, Json<JsonResponse<PublicUser>>)> {
    let email = normalize_email(&payload.email);
    check_email(&email)?;
    check_password(&payload.password)?;

    let password_hash = hash_off_thread(payload.password).await?;
    let user = state
        .users
        .create(&NewUser {
            email,
            first_name: payload.first_name.trim().to_owned(),
            last_name: payload.last_name.trim().to_owned(),
            password_hash,
            active: true,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(JsonResponse::ok("user created", user.into())),
    ))
}

#[instrument(skip(state))]
pub async fn all_users(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> AppResult<Json<JsonResponse<UserList>>> {
    let users = state.users.list().await?;
    let users = users.into_iter().map(PublicUser::from).collect();
    Ok(Json(JsonResponse::ok("success", UserList { users })))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<JsonResponse<PublicUser>>> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;
    Ok(Json(JsonResponse::ok("success", user.into())))
}

/// Creates the user when no id is given, otherwise updates it. A new
/// password, if any, is written together with the profile fields.
#[instrument(skip(state, payload))]
pub async fn save_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    JsonBody(payload): JsonBody<SaveUserRequest>,
) -> AppResult<(StatusCode, Json<JsonResponse<PublicUser>>)> {
    let email = normalize_email(&payload.email);
    check_email(&email)?;
    let password = payload.password.filter(|p| !p.is_empty());
    if let Some(p) = &password {
        check_password(p)?;
    }

    let user = match payload.id {
        None => {
            let password = password.ok_or_else(|| {
                AppError::Validation("password is required for a new user".into())
            })?;
            let password_hash = hash_off_thread(password).await?;
            state
                .users
                .create(&NewUser {
                    email,
                    first_name: payload.first_name,
                    last_name: payload.last_name,
                    password_hash,
                    active: payload.active,
                })
                .await?
        }
        Some(id) => {
            let password_hash = match password {
                Some(p) => Some(hash_off_thread(p).await?),
                None => None,
            };
            state
                .users
                .update(
                    &UserUpdate {
                        id,
                        email,
                        first_name: payload.first_name,
                        last_name: payload.last_name,
                        active: payload.active,
                    },
                    password_hash.as_deref(),
                )
                .await?
        }
    };

    info!(%actor, user_id = %user.id, "user saved");
    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::ok("changes saved", user.into())),
    ))
}

#[instrument(skip(state, payload))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    JsonBody(payload): JsonBody<DeleteUserRequest>,
) -> AppResult<Json<JsonResponse<()>>> {
    if state.users.delete(payload.id).await? == 0 {
        return Err(AppError::NotFound(format!("user {} not found", payload.id)));
    }
    info!(%actor, user_id = %payload.id, "user deleted");
    Ok(Json(JsonResponse::message("user deleted")))
}

/// Deactivates the user and ends every session they have.
#[instrument(skip(state))]
pub async fn log_user_out(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<JsonResponse<RevokedSessions>>)> {
    let tokens_removed = state.sessions.deactivate(id).await?;
    info!(%actor, user_id = %id, tokens_removed, "user logged out and deactivated");
    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::ok(
            "user logged out and set to inactive",
            RevokedSessions { tokens_removed },
        )),
    ))
}
