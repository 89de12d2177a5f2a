use crate::domain_model::{TokenHash, User, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid provider token")]
    InvalidProviderToken,
    #[error("unauthorized")]
    Unauthorized,
    #[error("token invalid")]
    TokenInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("user not found")]
    UserNotFound,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// True for every failure the client must see as a plain 401.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidProviderToken
                | AuthError::Unauthorized
                | AuthError::TokenInvalid
                | AuthError::TokenExpired
                | AuthError::UserNotFound
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken(pub String);

/// Opaque refresh value. Only ever handed out in plaintext at issuance.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RefreshToken(pub String);

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: User,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAccess {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

pub trait TokenCodec: Send + Sync {
    fn issue_access(&self, user: UserId) -> Result<(AccessToken, DateTime<Utc>), AuthError>;
    fn issue_refresh_value(&self) -> RefreshToken;
    fn hash_refresh_value(&self, token: &str) -> TokenHash;
    fn verify_access(&self, token: &AccessToken) -> Result<VerifiedAccess, AuthError>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Exchanges a provider identity token for a fresh access/refresh pair.
    async fn login(&self, provider_token: &str) -> Result<LoginResult, AuthError>;
    /// Rotates a refresh token. Replays revoke the whole session line.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;
    /// Revokes the session behind a refresh token. Never fails on unknown tokens.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
    /// Resolves the user behind a bearer access token.
    async fn authenticate(&self, access_token: &str) -> Result<User, AuthError>;
}
