use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, RefreshSession>,
    by_hash: HashMap<TokenHash, SessionId>,
}

impl Sessions {
    fn insert(&mut self, session: NewRefreshSession) -> Result<SessionId, AuthError> {
        if self.by_id.contains_key(&session.id) || self.by_hash.contains_key(&session.token_hash) {
            return Err(AuthError::InternalError(
                "duplicate refresh session".to_string(),
            ));
        }
        let id = session.id;
        self.by_hash.insert(session.token_hash.clone(), id);
        self.by_id.insert(id, session.into_session());
        Ok(id)
    }

    fn by_hash(&self, hash: &TokenHash) -> Option<&RefreshSession> {
        self.by_hash.get(hash).and_then(|id| self.by_id.get(id))
    }
}

/// Process-local session store for development and tests. One mutex
/// covers every check-and-write, which makes `rotate` atomic.
#[derive(Default)]
pub struct MemoryRefreshSessionStore {
    inner: Mutex<Sessions>,
}

impl MemoryRefreshSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Sessions>, AuthError> {
        self.inner
            .lock()
            .map_err(|e| AuthError::StorageUnavailable(e.to_string()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.by_id.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn get(&self, id: SessionId) -> Option<RefreshSession> {
        self.lock().ok()?.by_id.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn sessions_of(&self, user_id: UserId) -> Vec<RefreshSession> {
        let Ok(sessions) = self.lock() else {
            return Vec::new();
        };
        let mut out: Vec<_> = sessions
            .by_id
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.issued_at);
        out
    }
}

#[async_trait::async_trait]
impl RefreshSessionStore for MemoryRefreshSessionStore {
    async fn create(&self, session: NewRefreshSession) -> Result<SessionId, AuthError> {
        self.lock()?.insert(session)
    }

    async fn find_active_by_hash(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AuthError> {
        Ok(self
            .lock()?
            .by_hash(token_hash)
            .filter(|s| s.is_usable_at(now))
            .cloned())
    }

    async fn find_by_hash(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<RefreshSession>, AuthError> {
        Ok(self.lock()?.by_hash(token_hash).cloned())
    }

    async fn revoke(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool, AuthError> {
        let mut sessions = self.lock()?;
        match sessions.by_id.get_mut(&session_id) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate(
        &self,
        old: SessionId,
        successor: NewRefreshSession,
        at: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        let mut sessions = self.lock()?;
        match sessions.by_id.get(&old) {
            Some(s) if s.revoked_at.is_none() => {}
            _ => return Ok(RotateOutcome::AlreadyConsumed),
        }

        let successor_id = sessions.insert(successor)?;
        if let Some(s) = sessions.by_id.get_mut(&old) {
            s.revoked_at = Some(at);
            s.replaced_by = Some(successor_id);
        }
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_lineage(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let mut sessions = self.lock()?;
        let mut revoked = 0;
        let mut next = Some(session_id);
        while let Some(id) = next {
            let Some(s) = sessions.by_id.get_mut(&id) else {
                break;
            };
            if s.revoked_at.is_none() {
                s.revoked_at = Some(at);
                revoked += 1;
            }
            next = s.replaced_by.filter(|n| *n != session_id);
        }
        Ok(revoked)
    }
}
