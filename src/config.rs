use std::{env, net::SocketAddr};

use url::Url;

use crate::error::AppError;

const DEV_COOKIE_SECRET: &str = "change-me-trippack-dev-cookie-secret-at-least-64-bytes-long!!";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cookie_secret: String,
    pub cookie_secure: bool,
    pub public_base_url: Url,
    pub events_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://trippack.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let cookie_secret = env::var("COOKIE_SECRET").unwrap_or_else(|_| {
            tracing::warn!("COOKIE_SECRET not set, using the development secret");
            DEV_COOKIE_SECRET.to_string()
        });

        let cookie_secure = match env::var("COOKIE_SECURE") {
            Ok(raw) => raw
                .parse::<bool>()
                .map_err(|err| AppError::Config(format!("invalid COOKIE_SECURE: {err}")))?,
            Err(_) => false,
        };

        let public_base_url = parse_base_url(
            &env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000/".to_string()),
        )?;

        let events_capacity = match env::var("EVENTS_CAPACITY") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|cap| *cap > 0)
                .ok_or_else(|| AppError::Config(format!("invalid EVENTS_CAPACITY: {raw}")))?,
            Err(_) => 256,
        };

        Ok(Self {
            database_url,
            listen_addr,
            cookie_secret,
            cookie_secure,
            public_base_url,
            events_capacity,
        })
    }

    /// Settings for tests and local tooling: in-memory-friendly defaults
    /// pointed at the given database.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cookie_secret: DEV_COOKIE_SECRET.to_string(),
            cookie_secure: false,
            public_base_url: Url::parse("http://localhost:3000/").expect("static url parses"),
            events_capacity: 64,
        }
    }
}

// A base without a trailing slash would make `Url::join` drop its last segment.
fn parse_base_url(raw: &str) -> Result<Url, AppError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized)
        .map_err(|err| AppError::Config(format!("invalid PUBLIC_BASE_URL: {err}")))
}
