// src/discovery.rs

use crate::error::PortalAuthError;
use crate::model::OpenIdConfiguration;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Process-wide cache of the provider's discovery document.
///
/// Concurrent first callers share one in-flight fetch. Without a TTL the
/// document lives as long as the process; [`DiscoveryCache::refresh`] drops it
/// so the next caller fetches again.
#[derive(Clone)]
pub struct DiscoveryCache {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    discovery_url: Url,
    document: Cache<String, Arc<OpenIdConfiguration>>,
}

impl DiscoveryCache {
    pub fn new(http_client: reqwest::Client, discovery_url: Url, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(1);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: Arc::new(Inner {
                http_client,
                discovery_url,
                document: builder.build(),
            }),
        }
    }

    /// Returns the cached discovery document, fetching it on first use.
    pub async fn get(&self) -> Result<Arc<OpenIdConfiguration>, PortalAuthError> {
        let url = self.inner.discovery_url.clone();
        self.inner
            .document
            .try_get_with(url.to_string(), self.fetch(url))
            .await
            .map_err(|e| unshare(e, PortalAuthError::Discovery))
    }

    /// Forgets the cached document.
    pub fn refresh(&self) {
        self.inner.document.invalidate_all();
    }

    #[instrument(skip(self), err)]
    async fn fetch(&self, url: Url) -> Result<Arc<OpenIdConfiguration>, PortalAuthError> {
        debug!("Performing OIDC discovery at: {}", url);
        let response = self
            .inner
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| PortalAuthError::Discovery(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortalAuthError::Discovery(format!(
                "Failed to load OpenID configuration ({status}): {body}"
            )));
        }

        let document: OpenIdConfiguration = response
            .json()
            .await
            .map_err(|e| PortalAuthError::Discovery(format!("invalid discovery document: {e}")))?;
        debug!(issuer = %document.issuer, jwks_uri = %document.jwks_uri, "Discovery document loaded");
        Ok(Arc::new(document))
    }
}

/// `moka` hands the same error to every waiter of a failed load. Takes it
/// back when this caller is the only holder, otherwise rebuilds it from its
/// message with `rebuild`.
fn unshare(error: Arc<PortalAuthError>, rebuild: fn(String) -> PortalAuthError) -> PortalAuthError {
    match Arc::try_unwrap(error) {
        Ok(error) => error,
        Err(shared) => match shared.as_ref() {
            PortalAuthError::Discovery(message) => PortalAuthError::Discovery(message.clone()),
            other => rebuild(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document(server: &MockServer) -> serde_json::Value {
        json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
            "jwks_uri": format!("{}/jwks", server.uri()),
        })
    }

    fn discovery_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/.well-known/openid-configuration", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn fetches_once_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(reqwest::Client::new(), discovery_url(&server), None);
        let (first, second) = tokio::join!(cache.get(), cache.get());
        let first = first.unwrap();
        assert_eq!(first, second.unwrap());
        assert_eq!(first.issuer, server.uri());
        assert!(first.userinfo_endpoint.is_none());
        cache.get().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_forces_a_new_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server)))
            .expect(2)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(reqwest::Client::new(), discovery_url(&server), None);
        cache.get().await.unwrap();
        cache.refresh();
        cache.get().await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_a_discovery_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(reqwest::Client::new(), discovery_url(&server), None);
        match cache.get().await {
            Err(PortalAuthError::Discovery(message)) => {
                assert!(message.contains("503"));
                assert!(message.contains("maintenance"));
            }
            other => panic!("expected a discovery error, got {other:?}"),
        }
    }
}
