use crate::application_port::AuthError;
use sqlx::PgPool;
use sqlx::postgres::PgDatabaseError;

const SCHEMA: &str = include_str!("../../schema.sql");

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if let Some(pg_err) = db.try_downcast_ref::<PgDatabaseError>() {
            return pg_err.code() == "23505"; // unique_violation
        }
    }

    false
}

pub fn store_err(err: sqlx::Error) -> AuthError {
    AuthError::StorageUnavailable(err.to_string())
}

/// Creates the `users` and `refresh_sessions` tables if they are missing.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
