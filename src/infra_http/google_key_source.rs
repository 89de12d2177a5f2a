use crate::domain_port::{FetchedKeySet, SigningKeySource};
use anyhow::{Context, anyhow};
use jsonwebtoken::jwk::JwkSet;
use reqwest::header::CACHE_CONTROL;
use std::time::Duration;

pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Fetches a JWKS document over HTTPS with a bounded timeout.
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building key fetch client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl SigningKeySource for HttpKeySource {
    async fn fetch(&self) -> anyhow::Result<FetchedKeySet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {} returned {}", self.url, response.status()));
        }

        let max_age = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);
        let keys: JwkSet = response.json().await.context("decoding key set")?;
        if keys.keys.is_empty() {
            return Err(anyhow!("key set from {} is empty", self.url));
        }

        Ok(FetchedKeySet { keys, max_age })
    }
}

/// Extracts `max-age` from a Cache-Control header value.
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("max-age"))
        .and_then(|(_, value)| value.trim().trim_matches('"').parse::<u64>().ok())
        .map(Duration::from_secs)
}
