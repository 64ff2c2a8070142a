use axum::{extract::State, routing::get, Json, Router};
use axum_extra::extract::WithRejection;
use serde::Deserialize;

use super::JsonBody;
use crate::{
    auth::{self, AuthUser},
    error::AppError,
    models::{trip::TripSummary, user::Profile},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(profile).put(rename))
        .route("/trips", get(my_trips))
}

async fn profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Profile>, AppError> {
    let profile = auth::load_profile(&state.db, &user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
struct RenameForm {
    #[serde(default)]
    username: String,
}

async fn rename(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(Json(form), _): JsonBody<RenameForm>,
) -> Result<Json<Profile>, AppError> {
    let profile = auth::rename_user(&state, &user.id, &form.username).await?;
    Ok(Json(profile))
}

async fn my_trips(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<TripSummary>>, AppError> {
    Ok(Json(state.trips.list_for_user(&user.id).await?))
}
