use super::AuthError;
use chrono::{DateTime, Utc};

/// Identity claims extracted from a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub subject_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ProviderVerifier: Send + Sync {
    /// Every failure, including an unreachable key endpoint with nothing
    /// cached, is reported as [`AuthError::InvalidProviderToken`].
    async fn verify(&self, provider_token: &str) -> Result<ProviderIdentity, AuthError>;
}
