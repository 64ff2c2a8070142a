use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const SESSION_TTL_DAYS: i64 = 30;

pub fn session_ttl() -> Duration {
    Duration::days(SESSION_TTL_DAYS)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Identity resolved from a live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: Duration, revoked: bool) -> Session {
        let now = Utc::now();
        Session {
            id: "s".into(),
            user_id: "u".into(),
            created_at: now,
            last_seen_at: now,
            expires_at: now + expires_in,
            revoked_at: revoked.then_some(now),
        }
    }

    #[test]
    fn expired_or_revoked_sessions_are_dead() {
        let now = Utc::now();
        assert!(session(session_ttl(), false).is_live(now));
        assert!(!session(Duration::seconds(-1), false).is_live(now));
        assert!(!session(session_ttl(), true).is_live(now));
    }
}
