// src/client.rs

use crate::discovery::DiscoveryCache;
use crate::error::PortalAuthError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

/// A verification key from the provider's JWKS, with the modulus size the
/// primary verifier needs to decide whether it can use it.
pub struct PrimaryKey {
    pub decoding_key: DecodingKey,
    pub modulus_bits: usize,
}

/// A client for fetching and caching JSON Web Keys (JWKs) from the provider.
///
/// Keys are cached by `kid`. A lookup miss re-fetches the whole set once, so
/// rotated keys are picked up without a restart.
#[derive(Clone)]
pub struct JwksClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    // Cache stores `kid` -> key. Keys published without a `kid` are stored under "".
    key_cache: Cache<String, Arc<PrimaryKey>>,
    // Serializes refreshes so a burst of misses triggers one fetch.
    refresh_lock: Mutex<()>,
}

impl JwksClient {
    pub fn new(http_client: reqwest::Client, discovery: DiscoveryCache, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(100); // Max 100 keys, should be more than enough.
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: Arc::new(Inner {
                http_client,
                discovery,
                key_cache: builder.build(),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    /// Retrieves the candidate keys for the given Key ID (`kid`).
    ///
    /// It first checks the in-memory cache. On a miss it fetches the entire
    /// JWKS from the provider, populates the cache, and looks again. A token
    /// with a `kid` gets exactly that key; a token without one gets every
    /// cached key to try in turn.
    #[instrument(skip(self), err)]
    pub async fn get_keys(&self, kid: Option<&str>) -> Result<Vec<Arc<PrimaryKey>>, PortalAuthError> {
        let keys = self.lookup(kid).await;
        if !keys.is_empty() {
            debug!("JWK cache hit for kid: {:?}", kid);
            return Ok(keys);
        }

        let _guard = self.inner.refresh_lock.lock().await;
        // Another request may have refreshed the set while we waited.
        let keys = self.lookup(kid).await;
        if !keys.is_empty() {
            return Ok(keys);
        }

        debug!("JWK cache miss for kid: {:?}. Fetching from provider.", kid);
        self.fetch_and_cache_keys().await?;

        let keys = self.lookup(kid).await;
        if keys.is_empty() {
            return Err(PortalAuthError::KeyNotFound(kid.unwrap_or("<none>").to_string()));
        }
        Ok(keys)
    }

    /// Drops every cached key.
    pub fn refresh(&self) {
        self.inner.key_cache.invalidate_all();
    }

    async fn lookup(&self, kid: Option<&str>) -> Vec<Arc<PrimaryKey>> {
        match kid {
            Some(kid) => self.inner.key_cache.get(kid).await.into_iter().collect(),
            None => self.inner.key_cache.iter().map(|(_, key)| key).collect(),
        }
    }

    /// Fetches the JWKS from the provider and populates the cache.
    #[instrument(skip(self), err)]
    async fn fetch_and_cache_keys(&self) -> Result<(), PortalAuthError> {
        let jwks_uri = self.get_jwks_uri().await?;

        let jwks: JsonWebKeySet = self
            .inner
            .http_client
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Successfully fetched {} keys.", jwks.keys.len());

        for jwk in jwks.keys.iter().filter(|jwk| jwk.is_rsa()) {
            match primary_key(jwk) {
                Ok(key) => {
                    let kid = jwk.key_id().unwrap_or_default().to_string();
                    self.inner.key_cache.insert(kid, Arc::new(key)).await;
                }
                Err(e) => warn!("Skipping unusable JWK {:?}: {}", jwk.kid, e),
            }
        }
        Ok(())
    }

    async fn get_jwks_uri(&self) -> Result<Url, PortalAuthError> {
        let document = self.inner.discovery.get().await?;
        Url::parse(&document.jwks_uri).map_err(|e| PortalAuthError::InvalidUrl(e.to_string()))
    }
}

fn primary_key(jwk: &JsonWebKey) -> Result<PrimaryKey, PortalAuthError> {
    let n = jwk
        .n
        .as_deref()
        .ok_or_else(|| PortalAuthError::InvalidKeyFormat("RSA key missing 'n' component".to_string()))?;
    let e = jwk
        .e
        .as_deref()
        .ok_or_else(|| PortalAuthError::InvalidKeyFormat("RSA key missing 'e' component".to_string()))?;
    let modulus_bits = modulus_bits(n)?;
    let decoding_key = DecodingKey::from_rsa_components(n, e)
        .map_err(|e| PortalAuthError::InvalidKeyFormat(e.to_string()))?;
    Ok(PrimaryKey { decoding_key, modulus_bits })
}

/// Bit length of a base64url encoded big-endian RSA modulus.
pub(crate) fn modulus_bits(n: &str) -> Result<usize, PortalAuthError> {
    let bytes = URL_SAFE_NO_PAD.decode(n.trim_end_matches('='))?;
    let significant = match bytes.iter().position(|byte| *byte != 0) {
        Some(start) => &bytes[start..],
        None => return Ok(0),
    };
    Ok(significant.len() * 8 - significant[0].leading_zeros() as usize)
}
