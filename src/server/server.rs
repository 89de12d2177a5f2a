use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_http::HttpKeySource;
use crate::infra_memory::*;
use crate::infra_postgres::*;
use crate::logger::*;
use crate::settings::Settings;
use chrono::Duration;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How auth cookies are written by the HTTP layer.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
    pub domain: Option<String>,
    pub access_max_age_secs: i64,
    pub refresh_max_age_secs: i64,
}

impl CookiePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            secure: settings.cookie_secure(),
            domain: settings
                .http
                .cookie_domain
                .clone()
                .filter(|d| !d.trim().is_empty()),
            access_max_age_secs: settings.jwt.access_ttl_min * 60,
            refresh_max_age_secs: settings.jwt.refresh_ttl_days * 24 * 60 * 60,
        }
    }
}

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub cookies: CookiePolicy,
    refresher_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<PgPool>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancellationToken::new();

        let (user_repo, session_store, pool): (
            Arc<dyn UserRepo>,
            Arc<dyn RefreshSessionStore>,
            Option<PgPool>,
        ) = match settings.database.backend.as_str() {
            "memory" => {
                warn!("using in-memory storage; sessions will not survive a restart");
                let user_repo: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::new());
                let session_store: Arc<dyn RefreshSessionStore> =
                    Arc::new(MemoryRefreshSessionStore::new());
                (user_repo, session_store, None)
            }
            "postgres" => {
                let url = settings
                    .database
                    .url
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("database.url is not set"))?;
                let pool = PgPoolOptions::new()
                    .max_connections(settings.database.max_connections)
                    .connect(url.expose())
                    .await?;
                if settings.database.apply_schema {
                    apply_schema(&pool).await?;
                    info!("database schema applied");
                }
                let user_repo: Arc<dyn UserRepo> = Arc::new(PgUserRepo::new(pool.clone()));
                let session_store: Arc<dyn RefreshSessionStore> =
                    Arc::new(PgRefreshSessionStore::new(pool.clone()));
                (user_repo, session_store, Some(pool))
            }
            other => return Err(anyhow::anyhow!("Unknown database backend: {}", other)),
        };

        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(
            JwtConfig {
                issuer: settings.jwt.issuer.clone(),
                access_ttl: Duration::minutes(settings.jwt.access_ttl_min),
                signing_key: settings.jwt.secret.expose().as_bytes().to_vec(),
            },
            clock.clone(),
        ));

        let mut refresher_handle = None;
        let provider_verifier: Arc<dyn ProviderVerifier> = match settings.auth.provider.as_str() {
            "fake" => {
                warn!("using the fake identity provider");
                Arc::new(FakeProviderVerifier::new(clock.clone()))
            }
            "google" => {
                let google = &settings.google;
                let source = Arc::new(HttpKeySource::new(
                    google.certs_url.clone(),
                    std::time::Duration::from_secs(google.fetch_timeout_secs),
                )?);
                let mut cfg = GoogleVerifierConfig::new(google.client_id.clone());
                cfg.clock_skew = Duration::seconds(google.clock_skew_secs);
                cfg.key_cache_ttl = Duration::seconds(google.key_cache_ttl_secs);
                let verifier = Arc::new(GoogleIdTokenVerifier::new(cfg, source, clock.clone()));

                if google.background_refresh {
                    refresher_handle = Some(verifier.spawn_refresher(cancel.clone()));
                } else if let Err(e) = verifier.refresh().await {
                    // keys are fetched lazily on the first login instead
                    warn!(error = %e, "initial provider key fetch failed");
                }
                verifier
            }
            other => return Err(anyhow::anyhow!("Unknown auth provider: {}", other)),
        };

        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            provider_verifier,
            user_repo,
            token_codec,
            session_store,
            clock,
            Duration::days(settings.jwt.refresh_ttl_days),
        ));

        info!(
            env = %settings.env,
            provider = %settings.auth.provider,
            storage = %settings.database.backend,
            "server started"
        );

        Ok(Self {
            auth_service,
            cookies: CookiePolicy::from_settings(settings),
            refresher_handle: Mutex::new(refresher_handle),
            cancel,
            pool,
        })
    }

    /// Builds a server around an already wired service.
    pub fn from_parts(auth_service: Arc<dyn AuthService>, cookies: CookiePolicy) -> Self {
        Self {
            auth_service,
            cookies,
            refresher_handle: Mutex::new(None),
            cancel: CancellationToken::new(),
            pool: None,
        }
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handle = match self.refresher_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let r = handle.await;
            info!("key refresher handle dropped: {:?}", r);
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
