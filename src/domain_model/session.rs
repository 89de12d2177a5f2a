use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new_v4() -> Self {
        SessionId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex SHA-256 of a raw refresh value. The raw value is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct TokenHash(pub String);

impl TokenHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub token_hash: TokenHash,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct NewRefreshSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub token_hash: TokenHash,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshSession {
    pub fn into_session(self) -> RefreshSession {
        RefreshSession {
            id: self.id,
            user_id: self.user_id,
            token_hash: self.token_hash,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked_at: None,
            replaced_by: None,
        }
    }
}

/// Lifecycle state of a session, derived from its row at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Rotated,
    Revoked,
}

impl RefreshSession {
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        match (self.revoked_at, self.replaced_by) {
            (Some(_), Some(_)) => SessionState::Rotated,
            (Some(_), None) => SessionState::Revoked,
            (None, _) if self.expires_at <= now => SessionState::Expired,
            (None, _) => SessionState::Active,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SessionState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated,
    /// The old session had already been revoked or rotated by someone else.
    AlreadyConsumed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn session(now: DateTime<Utc>) -> RefreshSession {
        RefreshSession {
            id: SessionId::new_v4(),
            user_id: UserId::new_v4(),
            token_hash: TokenHash("ab".into()),
            issued_at: now,
            expires_at: now + Duration::days(1),
            revoked_at: None,
            replaced_by: None,
        }
    }

    #[test]
    fn state_follows_revocation_and_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut s = session(now);
        assert_eq!(s.state_at(now), SessionState::Active);
        assert_eq!(s.state_at(s.expires_at), SessionState::Expired);

        s.revoked_at = Some(now);
        assert_eq!(s.state_at(now), SessionState::Revoked);

        s.replaced_by = Some(SessionId::new_v4());
        assert_eq!(s.state_at(now), SessionState::Rotated);
        assert!(!s.is_usable_at(now));
    }
}
