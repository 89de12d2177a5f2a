use super::util::{is_unique_violation, store_err};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        PgUserRepo { pool }
    }

    fn row_to_user(row: PgRow) -> Result<User, AuthError> {
        Ok(User {
            id: row.try_get("id").map_err(store_err)?,
            provider_subject: row.try_get("provider_subject").map_err(store_err)?,
            email: row.try_get("email").map_err(store_err)?,
            email_verified: row.try_get("email_verified").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
        })
    }

    async fn find_one(&self, sql: &str, value: &str) -> Result<Option<User>, AuthError> {
        let row_opt: Option<PgRow> = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row_opt.map(Self::row_to_user).transpose()
    }
}

#[async_trait::async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, user: NewUser) -> Result<User, CreateUserError> {
        let result = sqlx::query(
            r#"
INSERT INTO users (id, provider_subject, email, email_verified, created_at)
VALUES ($1, $2, $3, $4, $5)
"#,
        )
        .bind(user.id)
        .bind(&user.provider_subject)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user.into_user()),
            Err(e) if is_unique_violation(&e) => Err(CreateUserError::Conflict),
            Err(e) => Err(store_err(e).into()),
        }
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        let row_opt: Option<PgRow> = sqlx::query(
            r#"
SELECT id, provider_subject, email, email_verified, created_at
FROM users
WHERE id = $1
"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_user).transpose()
    }

    async fn find_by_provider_subject(&self, subject: &str) -> Result<Option<User>, AuthError> {
        self.find_one(
            r#"
SELECT id, provider_subject, email, email_verified, created_at
FROM users
WHERE provider_subject = $1
"#,
            subject,
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.find_one(
            r#"
SELECT id, provider_subject, email, email_verified, created_at
FROM users
WHERE email = $1
"#,
            email,
        )
        .await
    }

    async fn link_provider_subject(
        &self,
        user_id: UserId,
        subject: &str,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET provider_subject = $2 WHERE id = $1 AND provider_subject IS NULL",
        )
        .bind(user_id)
        .bind(subject)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(store_err(e)),
        }
    }
}
