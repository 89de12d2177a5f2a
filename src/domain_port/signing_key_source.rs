use jsonwebtoken::jwk::JwkSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchedKeySet {
    pub keys: JwkSet,
    /// Freshness lifetime advertised by the source, if any.
    pub max_age: Option<Duration>,
}

#[async_trait::async_trait]
pub trait SigningKeySource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<FetchedKeySet>;
}
