use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

/// Durable refresh-session storage. Implementations must not cache
/// validity: a revocation is visible to the very next lookup.
#[async_trait::async_trait]
pub trait RefreshSessionStore: Send + Sync {
    async fn create(&self, session: NewRefreshSession) -> Result<SessionId, AuthError>;

    /// Lookup that only returns a session that is unrevoked and unexpired at `now`.
    async fn find_active_by_hash(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AuthError>;

    /// Lookup in any state, used to spot replays of spent tokens.
    async fn find_by_hash(&self, token_hash: &TokenHash)
    -> Result<Option<RefreshSession>, AuthError>;

    /// Sets `revoked_at` if unset. Returns whether this call revoked it.
    async fn revoke(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool, AuthError>;

    /// Atomically revokes `old`, points it at `successor` and inserts
    /// `successor`. Writes nothing if `old` was already revoked.
    async fn rotate(
        &self,
        old: SessionId,
        successor: NewRefreshSession,
        at: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError>;

    /// Revokes `session_id` and every successor reachable through
    /// `replaced_by`. Returns the number of sessions newly revoked.
    async fn revoke_lineage(&self, session_id: SessionId, at: DateTime<Utc>)
    -> Result<u64, AuthError>;
}
