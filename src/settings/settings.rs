use anyhow::{Result, anyhow, bail};
use config::{Config, File};
use serde::Deserialize;
use std::fmt;

/// Minimum length of the HS256 signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;
/// Upper bounds on token lifetimes.
pub const MAX_ACCESS_TTL_MIN: i64 = 24 * 60;
pub const MAX_REFRESH_TTL_DAYS: i64 = 3650;

/// Recognized environment variables and the settings key each one overrides.
pub const ENV_OVERRIDES: [(&str, &str); 10] = [
    ("DATABASE_URL", "database.url"),
    ("JWT_SECRET", "jwt.secret"),
    ("JWT_ISSUER", "jwt.issuer"),
    ("JWT_ACCESS_TTL_MIN", "jwt.access_ttl_min"),
    ("JWT_REFRESH_TTL_DAYS", "jwt.refresh_ttl_days"),
    ("GOOGLE_CLIENT_ID", "google.client_id"),
    ("ENV", "env"),
    ("COOKIE_DOMAIN", "http.cookie_domain"),
    ("COOKIE_SECURE", "http.cookie_secure"),
    ("RUST_LOG", "log.filter"),
];

/// A string that never shows up in logs.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_env")]
    pub env: String,
    pub auth: Auth,
    pub jwt: Jwt,
    #[serde(default)]
    pub google: Google,
    pub database: Database,
    pub http: Http,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub provider: String, // "google" or "fake"
}

#[derive(Debug, Deserialize)]
pub struct Jwt {
    pub secret: Secret,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl_min")]
    pub access_ttl_min: i64,
    #[serde(default = "default_refresh_ttl_days")]
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Google {
    pub client_id: String,
    pub certs_url: String,
    pub key_cache_ttl_secs: i64,
    pub fetch_timeout_secs: u64,
    pub clock_skew_secs: i64,
    pub background_refresh: bool,
}

impl Default for Google {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            certs_url: crate::infra_http::GOOGLE_CERTS_URL.to_string(),
            key_cache_ttl_secs: 3600,
            fetch_timeout_secs: 5,
            clock_skew_secs: 60,
            background_refresh: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub backend: String, // "postgres" or "memory"
    pub url: Option<Secret>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub apply_schema: bool,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    #[serde(default)]
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_issuer() -> String {
    "passage".to_string()
}

fn default_access_ttl_min() -> i64 {
    15
}

fn default_refresh_ttl_days() -> i64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

impl Settings {
    pub fn is_prod(&self) -> bool {
        self.env.eq_ignore_ascii_case("prod")
    }

    /// Production always gets `Secure` cookies.
    pub fn cookie_secure(&self) -> bool {
        self.http.cookie_secure || self.is_prod()
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.expose().len() < MIN_SECRET_LEN {
            bail!("jwt.secret must be at least {MIN_SECRET_LEN} bytes");
        }
        if !(1..=MAX_ACCESS_TTL_MIN).contains(&self.jwt.access_ttl_min) {
            bail!("jwt.access_ttl_min must be between 1 and {MAX_ACCESS_TTL_MIN}");
        }
        if !(1..=MAX_REFRESH_TTL_DAYS).contains(&self.jwt.refresh_ttl_days) {
            bail!("jwt.refresh_ttl_days must be between 1 and {MAX_REFRESH_TTL_DAYS}");
        }
        if self.google.clock_skew_secs < 0 {
            bail!("google.clock_skew_secs must not be negative");
        }
        match self.auth.provider.as_str() {
            "google" if self.google.client_id.trim().is_empty() => {
                bail!("google.client_id is required for the google provider")
            }
            "google" => {}
            "fake" if self.is_prod() => bail!("the fake provider is not allowed in prod"),
            "fake" => {}
            other => bail!("Unknown auth provider: {}", other),
        }
        match self.database.backend.as_str() {
            "postgres" if self.database.url.is_none() => {
                bail!("database.url is required for the postgres backend")
            }
            "postgres" => {}
            "memory" if self.is_prod() => bail!("the memory backend is not allowed in prod"),
            "memory" => {}
            other => bail!("Unknown database backend: {}", other),
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    parse_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Loads the settings file, then applies [`ENV_OVERRIDES`] looked up via `env`.
pub fn parse_settings_with_env<F>(path: Option<&str>, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.unwrap_or(SETTINGS_PATH);

    let mut builder = Config::builder().add_source(File::with_name(path));
    for (var, key) in ENV_OVERRIDES {
        builder = builder
            .set_override_option(key, env(var))
            .map_err(|e| anyhow!(e))?;
    }

    let settings: Settings = builder
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_dev_settings() {
        let settings = parse_settings_with_env(Some("settings/dev.toml"), env(&[])).unwrap();
        assert_eq!(settings.auth.provider, "fake");
        assert_eq!(settings.database.backend, "memory");
        assert_eq!(settings.jwt.access_ttl_min, 15);
        assert_eq!(settings.google.clock_skew_secs, 60);
        assert!(!settings.cookie_secure());
    }

    #[test]
    fn environment_overrides_file() {
        let settings = parse_settings_with_env(
            Some("settings/dev.toml"),
            env(&[
                ("JWT_ACCESS_TTL_MIN", "5"),
                ("JWT_REFRESH_TTL_DAYS", "7"),
                ("GOOGLE_CLIENT_ID", "abc.apps.googleusercontent.com"),
                ("DATABASE_URL", "postgres://app:pw@localhost/app"),
                ("COOKIE_SECURE", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.jwt.access_ttl_min, 5);
        assert_eq!(settings.jwt.refresh_ttl_days, 7);
        assert_eq!(settings.google.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(
            settings.database.url.as_ref().map(Secret::expose),
            Some("postgres://app:pw@localhost/app")
        );
        assert!(settings.cookie_secure());
    }

    #[test]
    fn rejects_short_secret() {
        let err =
            parse_settings_with_env(Some("settings/dev.toml"), env(&[("JWT_SECRET", "short")]))
                .unwrap_err();
        assert!(err.to_string().contains("jwt.secret"));
    }

    #[test]
    fn rejects_token_lifetimes_out_of_range() {
        for (var, value, key) in [
            ("JWT_REFRESH_TTL_DAYS", "200000000", "jwt.refresh_ttl_days"),
            ("JWT_REFRESH_TTL_DAYS", "0", "jwt.refresh_ttl_days"),
            ("JWT_ACCESS_TTL_MIN", "1441", "jwt.access_ttl_min"),
            ("JWT_ACCESS_TTL_MIN", "-5", "jwt.access_ttl_min"),
        ] {
            let err = parse_settings_with_env(Some("settings/dev.toml"), env(&[(var, value)]))
                .unwrap_err();
            assert!(err.to_string().contains(key), "{var}={value}: {err}");
        }

        let settings = parse_settings_with_env(
            Some("settings/dev.toml"),
            env(&[("JWT_ACCESS_TTL_MIN", "1440"), ("JWT_REFRESH_TTL_DAYS", "3650")]),
        )
        .unwrap();
        assert_eq!(settings.jwt.refresh_ttl_days, MAX_REFRESH_TTL_DAYS);
    }

    #[test]
    fn prod_refuses_development_backends() {
        let err = parse_settings_with_env(Some("settings/dev.toml"), env(&[("ENV", "prod")]))
            .unwrap_err();
        assert!(err.to_string().contains("not allowed in prod"));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let settings = parse_settings_with_env(Some("settings/dev.toml"), env(&[])).unwrap();
        let printed = format!("{:?}", settings);
        assert!(!printed.contains(settings.jwt.secret.expose()));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(parse_settings_with_env(Some(""), env(&[])).is_err());
    }
}
