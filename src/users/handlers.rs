use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::AppResult,
    state::AppState,
    users::{
        dto::{CreateUserRequest, UpdateUserRequest, UserEnvelope, UsersEnvelope},
        services::{self, parse_user_id},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<UsersEnvelope>> {
    let users = services::list_users(state.store.as_ref()).await?;
    Ok(Json(UsersEnvelope { users }))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<UserEnvelope>)> {
    let Json(payload) = payload?;
    let user = services::create_user(state.store.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(UserEnvelope { user })))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let user = services::get_user(state.store.as_ref(), id).await?;
    Ok(Json(UserEnvelope { user }))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let Json(payload) = payload?;
    let user = services::update_user(state.store.as_ref(), id, payload).await?;
    Ok(Json(UserEnvelope { user }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserEnvelope>> {
    let id = parse_user_id(&id)?;
    let user = services::delete_user(state.store.as_ref(), id).await?;
    Ok(Json(UserEnvelope { user }))
}
