use super::util::store_err;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const SESSION_COLUMNS: &str =
    "id, user_id, token_hash, issued_at, expires_at, revoked_at, replaced_by";

pub struct PgRefreshSessionStore {
    pool: PgPool,
}

impl PgRefreshSessionStore {
    pub fn new(pool: PgPool) -> Self {
        PgRefreshSessionStore { pool }
    }

    fn row_to_session(row: PgRow) -> Result<RefreshSession, AuthError> {
        Ok(RefreshSession {
            id: row.try_get("id").map_err(store_err)?,
            user_id: row.try_get("user_id").map_err(store_err)?,
            token_hash: row.try_get("token_hash").map_err(store_err)?,
            issued_at: row.try_get("issued_at").map_err(store_err)?,
            expires_at: row.try_get("expires_at").map_err(store_err)?,
            revoked_at: row.try_get("revoked_at").map_err(store_err)?,
            replaced_by: row.try_get("replaced_by").map_err(store_err)?,
        })
    }
}

#[async_trait::async_trait]
impl RefreshSessionStore for PgRefreshSessionStore {
    async fn create(&self, session: NewRefreshSession) -> Result<SessionId, AuthError> {
        sqlx::query(
            r#"
INSERT INTO refresh_sessions (id, user_id, token_hash, issued_at, expires_at)
VALUES ($1, $2, $3, $4, $5)
"#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(session.id)
    }

    async fn find_active_by_hash(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AuthError> {
        let row_opt: Option<PgRow> = sqlx::query(&format!(
            r#"
SELECT {SESSION_COLUMNS}
FROM refresh_sessions
WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
"#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_session).transpose()
    }

    async fn find_by_hash(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<RefreshSession>, AuthError> {
        let row_opt: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM refresh_sessions WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_session).transpose()
    }

    async fn revoke(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn rotate(
        &self,
        old: SessionId,
        successor: NewRefreshSession,
        at: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // successor goes in first so replaced_by can reference it
        sqlx::query(
            r#"
INSERT INTO refresh_sessions (id, user_id, token_hash, issued_at, expires_at)
VALUES ($1, $2, $3, $4, $5)
"#,
        )
        .bind(successor.id)
        .bind(successor.user_id)
        .bind(&successor.token_hash)
        .bind(successor.issued_at)
        .bind(successor.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        // a concurrent rotation holding the row lock makes this match zero rows
        let consumed = sqlx::query(
            r#"
UPDATE refresh_sessions
SET revoked_at = $2, replaced_by = $3
WHERE id = $1 AND revoked_at IS NULL
"#,
        )
        .bind(old)
        .bind(at)
        .bind(successor.id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await.map_err(store_err)?;
            return Ok(RotateOutcome::AlreadyConsumed);
        }

        tx.commit().await.map_err(store_err)?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_lineage(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let result = sqlx::query(
            r#"
WITH RECURSIVE line AS (
    SELECT id, replaced_by FROM refresh_sessions WHERE id = $1
    UNION
    SELECT s.id, s.replaced_by
    FROM refresh_sessions s
    JOIN line ON s.id = line.replaced_by
)
UPDATE refresh_sessions
SET revoked_at = $2
WHERE id IN (SELECT id FROM line) AND revoked_at IS NULL
"#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
