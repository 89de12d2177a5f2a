use crate::application_port::*;
use crate::domain_port::Clock;
use chrono::Duration;
use std::sync::Arc;

const FAKE_PREFIX: &str = "fake-id-token:";

/// Accepts `fake-id-token:<subject>[:<email>]` for local development.
pub struct FakeProviderVerifier {
    clock: Arc<dyn Clock>,
}

impl FakeProviderVerifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn token_for(subject: &str, email: Option<&str>) -> String {
        match email {
            Some(email) => format!("{FAKE_PREFIX}{subject}:{email}"),
            None => format!("{FAKE_PREFIX}{subject}"),
        }
    }
}

#[async_trait::async_trait]
impl ProviderVerifier for FakeProviderVerifier {
    async fn verify(&self, provider_token: &str) -> Result<ProviderIdentity, AuthError> {
        let rest = provider_token
            .strip_prefix(FAKE_PREFIX)
            .ok_or(AuthError::InvalidProviderToken)?;
        let (subject, email) = match rest.split_once(':') {
            Some((subject, email)) => (subject, Some(email.to_string())),
            None => (rest, None),
        };
        if subject.is_empty() {
            return Err(AuthError::InvalidProviderToken);
        }

        let now = self.clock.now();
        Ok(ProviderIdentity {
            subject_id: subject.to_string(),
            email_verified: email.is_some(),
            email,
            issued_at: now,
            expires_at: now + Duration::hours(1),
        })
    }
}
