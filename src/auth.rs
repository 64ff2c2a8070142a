use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::{
    cookie::{Cookie, Key, SameSite},
    PrivateCookieJar,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        session::{session_ttl, Session, SessionUser, SESSION_TTL_DAYS},
        user::{normalize_username, Profile, User, MIN_PASSWORD_LEN, MIN_USERNAME_LEN},
    },
    state::AppState,
};

pub const SESSION_COOKIE: &str = "trippack_session";

/// The caller, if the request carries a live session.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<SessionUser>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<SessionUser>() {
            return Ok(Self(Some(user.clone())));
        }

        let jar = PrivateCookieJar::<Key>::from_request_parts(parts, state)
            .await
            .map_err(|never| -> AppError { match never {} })?;
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(Self(None));
        };

        let user = validate_session(&state.db, cookie.value()).await?;
        if let Some(user) = &user {
            parts.extensions.insert(user.clone());
        }
        Ok(Self(user))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&SessionUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

/// The caller of a route that needs a login. Rejects with `Unauthorized`
/// before any body extractor runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        current.require_user().cloned().map(Self)
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::PasswordHash(err.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AppError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| AppError::PasswordHash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub async fn register_user(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Profile, AppError> {
    let username = normalize_username(username).ok_or_else(|| {
        AppError::bad_request(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters"
        ))
    })?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?1")
        .bind(&username)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::bad_request("Username already taken"));
    }

    let password_hash = hash_password(password)?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        password_hash,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO users (id, username, password_hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.password_hash)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&state.db)
    .await
    .map_err(|err| match AppError::from_unique(err, "") {
        AppError::Conflict(_) => AppError::bad_request("Username already taken"),
        other => other,
    })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user.into())
}

pub async fn authenticate_user(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Profile, AppError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AppError::bad_request("Username and password are required"));
    }

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE username = ?1",
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await?;

    let Some(user) = user else {
        debug!(username, "login for unknown user");
        return Err(AppError::Unauthorized);
    };
    if !verify_password(password, &user.password_hash)? {
        debug!(user_id = %user.id, "login with wrong password");
        return Err(AppError::Unauthorized);
    }
    Ok(user.into())
}

pub async fn rename_user(
    state: &AppState,
    user_id: &str,
    new_username: &str,
) -> Result<Profile, AppError> {
    let username = normalize_username(new_username).ok_or_else(|| {
        AppError::bad_request(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters"
        ))
    })?;

    let result = sqlx::query("UPDATE users SET username = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(&username)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&state.db)
        .await
        .map_err(|err| match AppError::from_unique(err, "") {
            AppError::Conflict(_) => AppError::bad_request("Username already taken"),
            other => other,
        })?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    info!(user_id, username = %username, "user renamed");
    load_profile(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn load_profile(db: &DbPool, user_id: &str) -> Result<Option<Profile>, AppError> {
    let profile =
        sqlx::query_as::<_, Profile>("SELECT id, username, created_at FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    Ok(profile)
}

/// Starts a server-side session for the user and returns its token.
pub async fn create_session(state: &AppState, user_id: &str) -> Result<String, AppError> {
    let now = Utc::now();
    let token = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&token)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(now + session_ttl())
    .execute(&state.db)
    .await?;
    debug!(user_id, "session issued");
    Ok(token)
}

/// Resolves a session token. Malformed, unknown, expired and revoked tokens
/// all come back as `None`; only storage failures are errors.
pub async fn validate_session(db: &DbPool, token: &str) -> Result<Option<SessionUser>, AppError> {
    if Uuid::parse_str(token).is_err() {
        return Ok(None);
    }

    let session = sqlx::query_as::<_, Session>(
        "SELECT id, user_id, created_at, last_seen_at, expires_at, revoked_at FROM sessions WHERE id = ?1",
    )
    .bind(token)
    .fetch_optional(db)
    .await?;

    let now = Utc::now();
    let Some(session) = session.filter(|s| s.is_live(now)) else {
        return Ok(None);
    };

    sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(&session.id)
        .execute(db)
        .await?;

    let profile = load_profile(db, &session.user_id).await?;
    Ok(profile.map(|p| SessionUser {
        id: p.id,
        username: p.username,
    }))
}

pub async fn destroy_session(state: &AppState, token: &str) -> Result<(), AppError> {
    if Uuid::parse_str(token).is_err() {
        warn!("logout with malformed session token");
        return Ok(());
    }
    sqlx::query("UPDATE sessions SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(token)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub fn apply_session_cookie(
    jar: PrivateCookieJar,
    token: &str,
    secure: bool,
) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, token.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::days(SESSION_TTL_DAYS))
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/").build())
}
