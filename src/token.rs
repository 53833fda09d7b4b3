// src/token.rs

use crate::config::Config;
use crate::discovery::DiscoveryCache;
use crate::error::PortalAuthError;
use crate::model::{RawTokenResponse, TokenResponse};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

/// Calls the provider's token and userinfo endpoints.
#[derive(Clone)]
pub struct TokenClient {
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
}

impl TokenClient {
    pub fn new(config: &Config, http_client: reqwest::Client, discovery: DiscoveryCache) -> Self {
        Self {
            http_client,
            discovery,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.to_string(),
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Codes are single use, so nothing here is retried.
    #[instrument(skip_all, err)]
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, PortalAuthError> {
        let document = self.discovery.get().await?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http_client
            .post(&document.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        // Error bodies are not always JSON.
        let raw: Option<RawTokenResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() || raw.as_ref().is_some_and(|raw| raw.error.is_some()) {
            let message = raw
                .as_ref()
                .and_then(|raw| raw.error_description.clone().or_else(|| raw.error.clone()))
                .unwrap_or_else(|| format!("token endpoint returned {status}"));
            return Err(PortalAuthError::TokenExchange(message));
        }

        let raw = raw.ok_or_else(|| {
            PortalAuthError::MalformedTokenResponse("token endpoint returned a non-JSON body".to_string())
        })?;
        let id_token = raw.id_token.filter(|token| !token.is_empty()).ok_or_else(|| {
            PortalAuthError::MalformedTokenResponse("token response is missing id_token".to_string())
        })?;

        debug!(expires_in = ?raw.expires_in, "Authorization code exchanged");
        Ok(TokenResponse {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            id_token,
            token_type: raw.token_type.unwrap_or_default(),
            expires_in: raw.expires_in,
            scope: raw.scope,
        })
    }

    /// Fetches the userinfo claims.
    ///
    /// Best effort: `None` when there is no access token, no advertised
    /// endpoint, or the provider does not answer with a JSON object.
    pub async fn fetch_user_info(&self, access_token: Option<&str>) -> Option<Map<String, Value>> {
        let access_token = access_token.filter(|token| !token.is_empty())?;
        let document = match self.discovery.get().await {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping userinfo: {}", e);
                return None;
            }
        };
        let endpoint = document.userinfo_endpoint.as_deref()?;

        let response = match self.http_client.get(endpoint).bearer_auth(access_token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Userinfo request failed: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Userinfo endpoint rejected the access token");
            return None;
        }

        match response.json::<Value>().await {
            Ok(Value::Object(claims)) => Some(claims),
            Ok(_) => {
                warn!("Userinfo response is not a JSON object");
                None
            }
            Err(e) => {
                warn!("Userinfo response could not be parsed: {}", e);
                None
            }
        }
    }
}
