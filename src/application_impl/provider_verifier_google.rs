use crate::application_port::*;
use crate::domain_port::{Clock, FetchedKeySet, SigningKeySource};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct GoogleVerifierConfig {
    pub client_id: String,
    pub issuers: Vec<String>,
    pub clock_skew: Duration,
    /// Used when the key endpoint does not advertise a max-age.
    pub key_cache_ttl: Duration,
    /// Lower bound between two refetches triggered by unknown key ids.
    pub min_refetch_interval: Duration,
}

impl GoogleVerifierConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            issuers: GOOGLE_ISSUERS.iter().map(|s| s.to_string()).collect(),
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            key_cache_ttl: Duration::hours(1),
            min_refetch_interval: Duration::seconds(60),
        }
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl CachedKeys {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.fetched_at + self.ttl
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

impl BoolOrString {
    fn as_bool(&self) -> bool {
        match self {
            BoolOrString::Bool(b) => *b,
            BoolOrString::String(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    iat: i64,
    exp: i64,
    email: Option<String>,
    email_verified: Option<BoolOrString>,
}

/// Verifies Google-issued ID tokens against a cached JWKS.
pub struct GoogleIdTokenVerifier {
    cfg: GoogleVerifierConfig,
    source: Arc<dyn SigningKeySource>,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedKeys>>,
    /// Serializes on-demand fetches; holds the time of the last failed one.
    refetch: Mutex<Option<DateTime<Utc>>>,
}

impl GoogleIdTokenVerifier {
    pub fn new(
        cfg: GoogleVerifierConfig,
        source: Arc<dyn SigningKeySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            source,
            clock,
            cache: RwLock::new(None),
            refetch: Mutex::new(None),
        }
    }

    /// Fetches the key set and replaces the cache. On failure the
    /// previous key set, if any, stays in place.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let FetchedKeySet { keys, max_age } = self.source.fetch().await?;
        let ttl = max_age
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or(self.cfg.key_cache_ttl);
        let count = keys.keys.len();
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: self.clock.now(),
            ttl,
        });
        debug!(keys = count, ttl_secs = ttl.num_seconds(), "provider key set refreshed");
        Ok(())
    }

    /// Keeps the cache warm until `cancel` fires.
    pub fn spawn_refresher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let verifier = self.clone();
        tokio::spawn(async move {
            info!("provider key refresher started");
            loop {
                if let Err(e) = verifier.refresh().await {
                    warn!(error = %e, "provider key refresh failed; keeping last known keys");
                }
                let wait = verifier.next_refresh_in().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            info!("provider key refresher stopped");
        })
    }

    async fn next_refresh_in(&self) -> std::time::Duration {
        let ttl = match self.cache.read().await.as_ref() {
            Some(cached) => cached.ttl,
            None => self.cfg.min_refetch_interval,
        };
        // refresh a little before the advertised lifetime runs out
        let secs = (ttl.num_seconds() * 4 / 5).max(self.cfg.min_refetch_interval.num_seconds());
        std::time::Duration::from_secs(secs.max(1) as u64)
    }

    fn lookup(cached: &Option<CachedKeys>, kid: &str) -> Option<DecodingKey> {
        let jwk = cached.as_ref()?.keys.find(kid)?;
        DecodingKey::from_jwk(jwk).ok()
    }

    fn needs_refetch(&self, cached: &Option<CachedKeys>, kid: &str, now: DateTime<Utc>) -> bool {
        match cached {
            None => true,
            Some(c) if !c.is_fresh(now) => true,
            Some(c) => {
                c.keys.find(kid).is_none() && now >= c.fetched_at + self.cfg.min_refetch_interval
            }
        }
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let now = self.clock.now();
        {
            let cached = self.cache.read().await;
            if !self.needs_refetch(&cached, kid, now) {
                return Self::lookup(&cached, kid)
                    .ok_or_else(|| reject(format!("unknown key id {kid}")));
            }
        }

        {
            let mut last_failure = self.refetch.lock().await;
            // another request may have refreshed while we waited
            let still_needed = self.needs_refetch(&*self.cache.read().await, kid, now);
            let backing_off = last_failure
                .is_some_and(|failed_at| now < failed_at + self.cfg.min_refetch_interval);
            if still_needed && !backing_off {
                match self.refresh().await {
                    Ok(()) => *last_failure = None,
                    Err(e) => {
                        *last_failure = Some(self.clock.now());
                        if self.cache.read().await.is_some() {
                            warn!(error = %e, "provider key fetch failed; using last known keys");
                        } else {
                            error!(error = %e, "provider key fetch failed and no keys are cached");
                        }
                    }
                }
            }
        }

        let cached = self.cache.read().await;
        Self::lookup(&cached, kid).ok_or_else(|| reject(format!("unknown key id {kid}")))
    }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(Algorithm::RS256);
        // time checks are done against the injected clock with our own skew
        v.validate_exp = false;
        v.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        v.set_audience(&[self.cfg.client_id.clone()]);
        v.set_issuer(self.cfg.issuers.as_slice());
        v
    }
}

fn reject(reason: impl Display) -> AuthError {
    debug!(%reason, "provider token rejected");
    AuthError::InvalidProviderToken
}

#[async_trait::async_trait]
impl ProviderVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, provider_token: &str) -> Result<ProviderIdentity, AuthError> {
        let header = decode_header(provider_token).map_err(reject)?;
        if header.alg != Algorithm::RS256 {
            return Err(reject(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| reject("missing key id"))?;
        let key = self.key_for(&kid).await?;

        let claims = decode::<GoogleClaims>(provider_token, &key, &self.validation())
            .map_err(reject)?
            .claims;

        let now = self.clock.now();
        let skew = self.cfg.clock_skew;
        let issued_at =
            DateTime::<Utc>::from_timestamp(claims.iat, 0).ok_or_else(|| reject("bad iat"))?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or_else(|| reject("bad exp"))?;
        if expires_at + skew <= now {
            return Err(reject("expired"));
        }
        if issued_at > now + skew {
            return Err(reject("issued in the future"));
        }
        if claims.sub.trim().is_empty() {
            return Err(reject("empty subject"));
        }

        Ok(ProviderIdentity {
            subject_id: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified.is_some_and(|v| v.as_bool()),
            issued_at,
            expires_at,
        })
    }
}
