use axum::{extract::State, routing::{get, post}, Json, Router};
use axum_extra::extract::{PrivateCookieJar, WithRejection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JsonBody;
use crate::{
    auth, error::AppError, models::session::SessionUser, models::user::Profile, state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    user: SessionUser,
}

impl From<Profile> for AuthResponse {
    fn from(profile: Profile) -> Self {
        Self {
            user: SessionUser {
                id: profile.id,
                username: profile.username,
            },
        }
    }
}

async fn signup(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    WithRejection(Json(form), _): JsonBody<Credentials>,
) -> Result<(PrivateCookieJar, Json<AuthResponse>), AppError> {
    let user = auth::register_user(&state, &form.username, &form.password).await?;
    let token = auth::create_session(&state, &user.id).await?;
    Ok((
        auth::apply_session_cookie(jar, &token, state.config.cookie_secure),
        Json(user.into()),
    ))
}

async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    WithRejection(Json(form), _): JsonBody<Credentials>,
) -> Result<(PrivateCookieJar, Json<AuthResponse>), AppError> {
    let user = auth::authenticate_user(&state, &form.username, &form.password).await?;
    let token = auth::create_session(&state, &user.id).await?;
    Ok((
        auth::apply_session_cookie(jar, &token, state.config.cookie_secure),
        Json(user.into()),
    ))
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<Value>), AppError> {
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        auth::destroy_session(&state, cookie.value()).await?;
    }
    Ok((
        auth::clear_session_cookie(jar),
        Json(json!({ "success": true })),
    ))
}
