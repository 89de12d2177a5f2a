use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RealAuthService {
    provider_verifier: Arc<dyn ProviderVerifier>,
    user_repo: Arc<dyn UserRepo>,
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn RefreshSessionStore>,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
}

impl RealAuthService {
    pub fn new(
        provider_verifier: Arc<dyn ProviderVerifier>,
        user_repo: Arc<dyn UserRepo>,
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn RefreshSessionStore>,
        clock: Arc<dyn Clock>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            provider_verifier,
            user_repo,
            token_codec,
            session_store,
            clock,
            refresh_ttl,
        }
    }

    async fn resolve_user(&self, identity: &ProviderIdentity) -> Result<User, AuthError> {
        if let Some(user) = self
            .user_repo
            .find_by_provider_subject(&identity.subject_id)
            .await?
        {
            return Ok(user);
        }

        let email = identity.email.as_deref().and_then(normalize_email);
        let existing = match &email {
            Some(email) => self.user_repo.find_by_email(email).await?,
            None => None,
        };

        // only a provider-verified address may claim an account
        if let Some(user) = existing.as_ref().filter(|_| identity.email_verified) {
            if user.provider_subject.is_none()
                && self
                    .user_repo
                    .link_provider_subject(user.id, &identity.subject_id)
                    .await?
            {
                info!(user_id = %user.id, "linked provider identity to existing account");
                return Ok(User {
                    provider_subject: Some(identity.subject_id.clone()),
                    ..user.clone()
                });
            }
        }

        let new_user = NewUser {
            id: UserId::new_v4(),
            provider_subject: identity.subject_id.clone(),
            // the address already belongs to another account
            email: if existing.is_some() { None } else { email },
            email_verified: identity.email_verified,
            created_at: self.clock.now(),
        };
        match self.user_repo.create(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "created user on first sign-in");
                Ok(user)
            }
            Err(CreateUserError::Conflict) => {
                // lost a race against a concurrent first login
                self.user_repo
                    .find_by_provider_subject(&identity.subject_id)
                    .await?
                    .ok_or_else(|| AuthError::InternalError("user conflict".to_string()))
            }
            Err(CreateUserError::Auth(e)) => Err(e),
        }
    }

    fn issue_pair(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(AuthTokens, NewRefreshSession), AuthError> {
        let (access_token, access_exp) = self.token_codec.issue_access(user_id)?;
        let refresh_token = self.token_codec.issue_refresh_value();
        let refresh_exp = now
            .checked_add_signed(self.refresh_ttl)
            .ok_or_else(|| AuthError::InternalError("refresh expiry out of range".to_string()))?;

        let session = NewRefreshSession {
            id: SessionId::new_v4(),
            user_id,
            token_hash: self.token_codec.hash_refresh_value(&refresh_token.0),
            issued_at: now,
            expires_at: refresh_exp,
        };
        let tokens = AuthTokens {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        };
        Ok((tokens, session))
    }

    async fn revoke_line(
        &self,
        session: &RefreshSession,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let revoked = self.session_store.revoke_lineage(session.id, now).await?;
        warn!(
            user_id = %session.user_id,
            session_id = %session.id,
            revoked,
            "refresh token reuse detected; session line revoked"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn login(&self, provider_token: &str) -> Result<LoginResult, AuthError> {
        let identity = self.provider_verifier.verify(provider_token).await?;
        let user = self.resolve_user(&identity).await?;

        let now = self.clock.now();
        let (tokens, session) = self.issue_pair(user.id, now)?;
        let session_id = self.session_store.create(session).await?;
        info!(user_id = %user.id, %session_id, "login");

        Ok(LoginResult { user, tokens })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let hash = self.token_codec.hash_refresh_value(refresh_token);
        let Some(session) = self.session_store.find_by_hash(&hash).await? else {
            debug!("refresh with unknown token");
            return Err(AuthError::Unauthorized);
        };

        let now = self.clock.now();
        match session.state_at(now) {
            SessionState::Expired => {
                self.session_store.revoke(session.id, now).await?;
                info!(session_id = %session.id, "refresh with expired session");
                Err(AuthError::Unauthorized)
            }
            SessionState::Rotated | SessionState::Revoked => {
                self.revoke_line(&session, now).await?;
                Err(AuthError::Unauthorized)
            }
            SessionState::Active => {
                let (tokens, successor) = self.issue_pair(session.user_id, now)?;
                let successor_id = successor.id;
                match self.session_store.rotate(session.id, successor, now).await? {
                    RotateOutcome::Rotated => {
                        debug!(from = %session.id, to = %successor_id, "refresh session rotated");
                        Ok(tokens)
                    }
                    RotateOutcome::AlreadyConsumed => {
                        self.revoke_line(&session, now).await?;
                        Err(AuthError::Unauthorized)
                    }
                }
            }
        }
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let hash = self.token_codec.hash_refresh_value(refresh_token);
        let now = self.clock.now();
        if let Some(session) = self.session_store.find_active_by_hash(&hash, now).await? {
            if self.session_store.revoke(session.id, now).await? {
                info!(user_id = %session.user_id, session_id = %session.id, "logout");
            }
        }
        Ok(())
    }

    async fn authenticate(&self, access_token: &str) -> Result<User, AuthError> {
        let verified = self
            .token_codec
            .verify_access(&AccessToken(access_token.to_string()))?;

        self.user_repo
            .find_by_id(verified.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}
