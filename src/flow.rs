// src/flow.rs

use crate::config::Config;
use crate::cookies::{
    create_cookie, purge_round_trip, GUEST_CI_COOKIE, NONCE_COOKIE, REDIRECT_COOKIE, REDIRECT_MAX_AGE_SECS,
    SESSION_MAX_AGE_SECS, STATE_COOKIE, STATE_MAX_AGE_SECS, VERIFIER_COOKIE,
};
use crate::discovery::DiscoveryCache;
use crate::error::PortalAuthError;
use crate::identity::Identity;
use crate::pkce::{create_pkce_challenge, create_random_string, NONCE_BYTES, STATE_BYTES, VERIFIER_BYTES};
use crate::session::{CookieSessionStore, PortalSession, SessionStore};
use crate::token::TokenClient;
use crate::validator::Validator;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::{form_urlencoded, Url};

pub const LOGIN_UNREACHABLE_MESSAGE: &str = "No se pudo conectar con GUB.UY. Verifica la configuracion.";
pub const INVALID_CALLBACK_MESSAGE: &str = "Respuesta invalida de GUB.UY.";
pub const STATE_MISMATCH_MESSAGE: &str = "El estado de autenticacion no coincide. Intenta nuevamente.";
pub const VERIFICATION_FAILED_MESSAGE: &str = "No se pudo verificar la identidad con GUB.UY. Intenta nuevamente.";
pub const MISSING_CI_MESSAGE: &str = "CI requerido";

const MAX_REDIRECT_LEN: usize = 2048;

/// How far a login got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    AwaitingCallback,
    Exchanging,
    Verifying,
    NonceCheck,
    Persisting,
}

/// The query string the provider sends back to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// What a callback ended in. Every variant maps to a redirect.
#[derive(Debug)]
pub enum CallbackOutcome {
    Established {
        session: Box<PortalSession>,
        redirect_to: String,
    },
    /// The provider sent `?error=`. Nothing was touched.
    ProviderDenied { error: String },
    Failed {
        stage: LoginStage,
        error: PortalAuthError,
        /// What the user is shown. Never carries the underlying error.
        message: &'static str,
    },
}

/// The login, callback and logout operations.
///
/// Owns the provider caches and the session store. Clones share them.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    post_logout_redirect: Url,
    discovery: DiscoveryCache,
    token_client: TokenClient,
    validator: Validator,
    sessions: Box<dyn SessionStore>,
}

impl Authenticator {
    /// Creates an `Authenticator` that keeps sessions in a cookie.
    pub fn new(config: Config) -> Result<Self, PortalAuthError> {
        let sessions = CookieSessionStore::new(config.cookies.clone());
        Self::with_session_store(config, sessions)
    }

    pub fn with_session_store<S>(config: Config, sessions: S) -> Result<Self, PortalAuthError>
    where
        S: SessionStore + 'static,
    {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout)
            .timeout(config.http.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let discovery = DiscoveryCache::new(http_client.clone(), config.discovery_url()?, config.cache.discovery_ttl);
        let token_client = TokenClient::new(&config, http_client.clone(), discovery.clone());
        let validator = Validator::new(&config, http_client, discovery.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                post_logout_redirect: config.post_logout_redirect_url()?,
                config,
                discovery,
                token_client,
                validator,
                sessions: Box::new(sessions),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn validator(&self) -> &Validator {
        &self.inner.validator
    }

    pub fn token_client(&self) -> &TokenClient {
        &self.inner.token_client
    }

    /// Drops the cached discovery document and keys.
    pub fn refresh_provider_metadata(&self) {
        self.inner.discovery.refresh();
        self.inner.validator.refresh_keys();
    }

    /// Starts a login: returns the authorization URL to send the user agent
    /// to and the jar with the four round-trip cookies.
    #[instrument(skip(self, jar), err)]
    pub async fn begin_login(
        &self,
        jar: CookieJar,
        redirect_to: Option<&str>,
    ) -> Result<(CookieJar, Url), PortalAuthError> {
        let config = &self.inner.config;
        let document = self.inner.discovery.get().await?;

        let state = create_random_string(STATE_BYTES);
        let code_verifier = create_random_string(VERIFIER_BYTES);
        let code_challenge = create_pkce_challenge(&code_verifier);
        let nonce = create_random_string(NONCE_BYTES);
        let redirect_to = self.post_login_target(redirect_to);

        let mut url = Url::parse(&document.authorization_endpoint)
            .map_err(|e| PortalAuthError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", config.redirect_uri.as_str())
                .append_pair("scope", &config.scopes)
                .append_pair("state", &state)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("nonce", &nonce);
            if let Some(acr_values) = config.acr_values.as_deref() {
                query.append_pair("acr_values", acr_values);
            }
        }

        let settings = &config.cookies;
        let jar = jar
            .add(create_cookie(STATE_COOKIE, state, STATE_MAX_AGE_SECS, settings))
            .add(create_cookie(VERIFIER_COOKIE, code_verifier, STATE_MAX_AGE_SECS, settings))
            .add(create_cookie(NONCE_COOKIE, nonce, STATE_MAX_AGE_SECS, settings))
            .add(create_cookie(REDIRECT_COOKIE, redirect_to, REDIRECT_MAX_AGE_SECS, settings));

        debug!("Redirecting to the authorization endpoint");
        Ok((jar, url))
    }

    /// Handles the provider's redirect back.
    ///
    /// Failures never escape: they come back as [`CallbackOutcome::Failed`]
    /// with the round-trip cookies expired in the jar.
    #[instrument(skip_all)]
    pub async fn complete_login(&self, jar: CookieJar, params: CallbackParams) -> (CookieJar, CallbackOutcome) {
        let settings = &self.inner.config.cookies;

        if let Some(error) = params.error.filter(|error| !error.is_empty()) {
            info!(error = %error, "Provider denied the authorization request");
            return (jar, CallbackOutcome::ProviderDenied { error });
        }

        let (code, state) = match (non_empty(params.code), non_empty(params.state)) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                let error = PortalAuthError::InvalidCallbackResponse("missing code or state".to_string());
                return self.fail(purge_round_trip(jar, settings), LoginStage::AwaitingCallback, error, INVALID_CALLBACK_MESSAGE);
            }
        };

        let cookie = |name: &str| jar.get(name).map(|c| c.value().to_string()).filter(|v| !v.is_empty());
        let stored_state = cookie(STATE_COOKIE);
        let code_verifier = cookie(VERIFIER_COOKIE);
        let expected_nonce = cookie(NONCE_COOKIE);
        let redirect_to = self.post_login_target(cookie(REDIRECT_COOKIE).as_deref());

        if stored_state.as_deref() != Some(state.as_str()) {
            return self.fail(
                purge_round_trip(jar, settings),
                LoginStage::AwaitingCallback,
                PortalAuthError::StateMismatch,
                STATE_MISMATCH_MESSAGE,
            );
        }

        let session = match self
            .establish(&code, code_verifier.as_deref(), expected_nonce.as_deref())
            .await
        {
            Ok(session) => session,
            Err((stage, error)) => {
                let jar = purge_round_trip(self.inner.sessions.clear(jar), settings);
                return self.fail(jar, stage, error, VERIFICATION_FAILED_MESSAGE);
            }
        };

        let jar = match self.inner.sessions.write(jar, &session) {
            Ok(jar) => jar,
            Err(error) => {
                // `write` consumed the jar; expire everything in a fresh one.
                let jar = purge_round_trip(self.inner.sessions.clear(CookieJar::new()), settings);
                return self.fail(jar, LoginStage::Persisting, error, VERIFICATION_FAILED_MESSAGE);
            }
        };

        info!(source = %session.access.source, "GUB.UY login successful");
        (
            purge_round_trip(jar, settings),
            CallbackOutcome::Established { session: Box::new(session), redirect_to },
        )
    }

    /// Ends the local session and returns where to send the user agent: the
    /// provider's end-session endpoint when there is an ID token to hint
    /// with, the configured post-logout target otherwise.
    #[instrument(skip_all)]
    pub async fn logout(&self, jar: CookieJar) -> (CookieJar, String) {
        let session = self.inner.sessions.read(&jar);
        let jar = purge_round_trip(self.inner.sessions.clear(jar), &self.inner.config.cookies);
        let fallback = self.inner.post_logout_redirect.to_string();

        let Some(id_token) = session.as_ref().and_then(PortalSession::id_token) else {
            return (jar, fallback);
        };

        let target = match self.inner.discovery.get().await {
            Ok(document) => match document.end_session_endpoint.as_deref().map(Url::parse) {
                Some(Ok(mut url)) => {
                    url.query_pairs_mut()
                        .append_pair("post_logout_redirect_uri", &fallback)
                        .append_pair("id_token_hint", id_token);
                    url.to_string()
                }
                Some(Err(e)) => {
                    warn!("Ignoring invalid end_session_endpoint: {}", e);
                    fallback
                }
                None => fallback,
            },
            Err(e) => {
                warn!("Failed to contact GUB.UY logout endpoint: {}", e);
                fallback
            }
        };
        (jar, target)
    }

    /// The session in the jar, if any.
    pub fn session(&self, jar: &CookieJar) -> Option<PortalSession> {
        self.inner.sessions.read(jar)
    }

    /// Guest access by identity document number.
    pub fn guest_login(&self, jar: CookieJar, ci: Option<&str>, redirect_to: Option<&str>) -> (CookieJar, String) {
        match ci.map(str::trim).filter(|ci| !ci.is_empty()) {
            Some(ci) => {
                let cookie = create_cookie(GUEST_CI_COOKIE, ci.to_string(), SESSION_MAX_AGE_SECS, &self.inner.config.cookies);
                (jar.add(cookie), self.post_login_target(redirect_to))
            }
            None => (jar, self.login_error_location(MISSING_CI_MESSAGE)),
        }
    }

    /// The login page with `error` set to `message`.
    pub fn login_error_location(&self, message: &str) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("error", message)
            .finish();
        format!("{}?{}", self.inner.config.login_path, query)
    }

    /// Where the user agent goes after a callback.
    pub fn callback_location(&self, outcome: &CallbackOutcome) -> String {
        match outcome {
            CallbackOutcome::Established { redirect_to, .. } => redirect_to.clone(),
            CallbackOutcome::ProviderDenied { error } => self.login_error_location(error),
            CallbackOutcome::Failed { message, .. } => self.login_error_location(message),
        }
    }

    async fn establish(
        &self,
        code: &str,
        code_verifier: Option<&str>,
        expected_nonce: Option<&str>,
    ) -> Result<PortalSession, (LoginStage, PortalAuthError)> {
        let tokens = self
            .inner
            .token_client
            .exchange_authorization_code(code, code_verifier)
            .await
            .map_err(|e| (LoginStage::Exchanging, e))?;

        let claims = self
            .inner
            .validator
            .verify(&tokens.id_token)
            .await
            .map_err(|e| (LoginStage::Verifying, e))?;

        if let Some(expected) = expected_nonce {
            if claims.nonce() != Some(expected) {
                return Err((LoginStage::NonceCheck, PortalAuthError::NonceMismatch));
            }
        }

        let user_info = self
            .inner
            .token_client
            .fetch_user_info(tokens.access_token.as_deref())
            .await;

        Ok(Identity::resolve(&claims, user_info.as_ref()).into_session(&tokens, Utc::now()))
    }

    fn fail(
        &self,
        jar: CookieJar,
        stage: LoginStage,
        error: PortalAuthError,
        message: &'static str,
    ) -> (CookieJar, CallbackOutcome) {
        error!(?stage, error = %error, "Failed to complete GUB.UY callback");
        (jar, CallbackOutcome::Failed { stage, error, message })
    }

    fn post_login_target(&self, requested: Option<&str>) -> String {
        requested
            .and_then(sanitize_redirect)
            .unwrap_or(self.inner.config.default_post_login_path.as_str())
            .to_string()
    }
}

/// Accepts only same-site relative paths.
pub fn sanitize_redirect(target: &str) -> Option<&str> {
    let target = target.trim();
    let acceptable = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains("://")
        && !target.contains('\\')
        && target.len() <= MAX_REDIRECT_LEN
        && !target.chars().any(char::is_control);
    acceptable.then_some(target)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
