use crate::application_port::*;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert a row. Fails with [`CreateUserError::Conflict`] when the
    /// provider subject or email is already taken.
    async fn create(&self, user: NewUser) -> Result<User, CreateUserError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError>;

    async fn find_by_provider_subject(&self, subject: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Attach a provider subject to an account that has none yet.
    /// Returns false when the account already carries a subject.
    async fn link_provider_subject(
        &self,
        user_id: UserId,
        subject: &str,
    ) -> Result<bool, AuthError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("user already exists")]
    Conflict,
    #[error(transparent)]
    Auth(#[from] AuthError),
}
