// src/legacy.rs

use crate::discovery::DiscoveryCache;
use crate::error::PortalAuthError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Slot for providers that publish a single key without a `kid`.
const DEFAULT_KEY: &str = "__default__";
const FETCH_ATTEMPTS: usize = 2;

/// Raw RSA JWKs for the manual RS256 verifier.
///
/// Every RSA key is kept by `kid`; the first one seen also fills the default
/// slot. A lookup miss re-fetches the whole set, so rotated keys are picked up
/// the same way the primary key cache picks them up.
#[derive(Clone)]
pub struct LegacyKeyCache {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    keys: Cache<String, Arc<JsonWebKey>>,
    // Serializes re-fetches so a burst of misses triggers one fetch.
    refresh_lock: Mutex<()>,
}

impl LegacyKeyCache {
    pub fn new(http_client: reqwest::Client, discovery: DiscoveryCache, ttl: Option<Duration>) -> Self {
        let mut keys = Cache::builder().max_capacity(100);
        if let Some(ttl) = ttl {
            keys = keys.time_to_live(ttl);
        }
        Self {
            inner: Arc::new(Inner {
                http_client,
                discovery,
                keys: keys.build(),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    /// Finds the RSA key for `kid`, or the default key for tokens without one,
    /// fetching the raw JWKS when the cache cannot answer.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, kid: Option<&str>) -> Result<Arc<JsonWebKey>, PortalAuthError> {
        if let Some(key) = self.cached(kid).await {
            debug!("Legacy key cache hit for kid: {:?}", kid);
            return Ok(key);
        }

        let _guard = self.inner.refresh_lock.lock().await;
        // Another request may have re-fetched the set while we waited.
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        debug!("Legacy key cache miss for kid: {:?}. Fetching JWKS.", kid);
        let keys = self.raw_keys().await?;
        keys.into_iter()
            .find(|key| key.is_rsa() && kid.map_or(true, |kid| key.key_id() == Some(kid)))
            .map(Arc::new)
            .ok_or_else(|| PortalAuthError::KeyNotFound(kid.unwrap_or("<none>").to_string()))
    }

    /// Drops every cached key.
    pub fn refresh(&self) {
        self.inner.keys.invalidate_all();
    }

    async fn cached(&self, kid: Option<&str>) -> Option<Arc<JsonWebKey>> {
        self.inner.keys.get(kid.unwrap_or(DEFAULT_KEY)).await
    }

    /// The full JWKS. After the retries are exhausted, whatever is already
    /// cached is served instead of the error.
    async fn raw_keys(&self) -> Result<Vec<JsonWebKey>, PortalAuthError> {
        let document = self.inner.discovery.get().await?;

        match self.fetch_with_retries(&document.jwks_uri).await {
            Ok(keys) => Ok(keys),
            Err(error) => {
                let cached: Vec<JsonWebKey> = self
                    .inner
                    .keys
                    .iter()
                    .filter(|(kid, _)| kid.as_str() != DEFAULT_KEY)
                    .map(|(_, key)| key.as_ref().clone())
                    .collect();
                if cached.is_empty() {
                    return Err(error);
                }
                warn!("JWKS fetch failed ({}); serving {} cached keys", error, cached.len());
                Ok(cached)
            }
        }
    }

    async fn fetch_with_retries(&self, jwks_uri: &str) -> Result<Vec<JsonWebKey>, PortalAuthError> {
        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch(jwks_uri).await {
                Ok(keys) => {
                    self.cache_keys(&keys).await;
                    return Ok(keys);
                }
                Err(e) => {
                    warn!(attempt, "Failed to load JWKS: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PortalAuthError::KeyNotFound("no JWKS fetch attempted".to_string())))
    }

    async fn fetch(&self, jwks_uri: &str) -> Result<Vec<JsonWebKey>, PortalAuthError> {
        let response = self.inner.http_client.get(jwks_uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortalAuthError::KeyNotFound(format!(
                "Failed to load JWKS ({status}): {body}"
            )));
        }
        let jwks: JsonWebKeySet = response.json().await?;
        Ok(jwks.keys)
    }

    async fn cache_keys(&self, keys: &[JsonWebKey]) {
        for key in keys.iter().filter(|key| key.is_rsa()) {
            let key = Arc::new(key.clone());
            match key.key_id() {
                Some(kid) => {
                    self.inner.keys.insert(kid.to_string(), key.clone()).await;
                    self.inner
                        .keys
                        .entry(DEFAULT_KEY.to_string())
                        .or_insert(key)
                        .await;
                }
                None => self.inner.keys.insert(DEFAULT_KEY.to_string(), key).await,
            }
        }
    }
}
