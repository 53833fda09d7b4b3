// src/config.rs

use crate::error::PortalAuthError;
use jsonwebtoken::Algorithm;
use std::ops::RangeInclusive;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SCOPES: &str = "openid personal_info email document profile";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_POST_LOGIN_PATH: &str = "/home";
pub const DEFAULT_POST_LOGOUT_REDIRECT: &str = "/login";

/// Moduli `ring` verifies through `jsonwebtoken`. Anything outside is handed
/// to the manual RS256 path.
pub const PRIMARY_MODULUS_BITS: RangeInclusive<usize> = 2048..=8192;

/// Contains the validation settings for an OIDC ID Token.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted for the ID Token.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp`, `nbf` and `iat`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
    /// RSA modulus sizes the primary (`jsonwebtoken`) path will attempt.
    pub primary_modulus_bits: RangeInclusive<usize>,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
            primary_modulus_bits: PRIMARY_MODULUS_BITS,
        }
    }
}

/// Attributes shared by every cookie the portal sets.
#[derive(Clone, Debug)]
pub struct CookieSettings {
    /// Adds the `Secure` attribute. On in production.
    pub secure: bool,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: false,
            path: "/".to_string(),
        }
    }
}

/// Timeouts applied to every call to the identity provider.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Lifetimes of the process-wide provider caches. `None` keeps entries for the
/// lifetime of the process; `refresh()` on the caches drops them on demand.
#[derive(Clone, Debug, Default)]
pub struct CacheSettings {
    pub discovery_ttl: Option<Duration>,
    pub key_ttl: Option<Duration>,
}

/// The main configuration for the portal's GUB.UY integration.
///
/// Build it with [`ConfigBuilder`] or load it from the environment with
/// [`Config::from_env`].
#[derive(Clone, Debug)]
pub struct Config {
    /// The issuer URL of the identity provider, without trailing slashes.
    pub issuer: String,
    /// The client ID registered with the identity provider. Used as the
    /// expected `aud` of ID tokens.
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Where the provider sends the user agent back after authentication.
    pub redirect_uri: Url,
    /// Overrides `{issuer}/.well-known/openid-configuration`.
    pub discovery_url: Option<Url>,
    /// Space separated scopes requested at login.
    pub scopes: String,
    pub acr_values: Option<String>,
    /// Absolute URL or path (resolved against the redirect URI's origin).
    pub post_logout_redirect: String,
    /// The page failed logins are sent to, with an `error` query parameter.
    pub login_path: String,
    /// Where a successful login lands when no `redirectTo` was requested.
    pub default_post_login_path: String,
    pub validation: ValidationDetails,
    pub cookies: CookieSettings,
    pub http: HttpSettings,
    pub cache: CacheSettings,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, PortalAuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PortalAuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| var(name).ok_or_else(|| PortalAuthError::MissingConfiguration(name.to_string()));

        let mut builder = ConfigBuilder::new()
            .issuer(&require("GUBUY_ISSUER")?)
            .client_id(require("GUBUY_CLIENT_ID")?)
            .redirect_uri(&require("GUBUY_REDIRECT_URI")?)?;

        if let Some(secret) = var("GUBUY_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }
        if let Some(url) = var("GUBUY_DISCOVERY_URL").or_else(|| var("GUBUY_WELL_KNOWN_URL")) {
            builder = builder.discovery_url(&url)?;
        }
        if let Some(scopes) = var("GUBUY_SCOPES") {
            builder = builder.scopes(scopes);
        }
        if let Some(acr) = var("GUBUY_ACR_VALUES") {
            builder = builder.acr_values(acr);
        }
        if let Some(target) = var("GUBUY_POST_LOGOUT_REDIRECT_URI") {
            builder = builder.post_logout_redirect(target);
        }
        if let Some(secs) = var("GUBUY_HTTP_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                PortalAuthError::InvalidConfiguration(format!("GUBUY_HTTP_TIMEOUT_SECS must be a number of seconds, got '{secs}'"))
            })?;
            builder = builder.http_timeout(Duration::from_secs(secs));
        }
        let production = var("PORTAL_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production"));

        builder.secure_cookies(production).build()
    }

    /// The discovery document location.
    pub fn discovery_url(&self) -> Result<Url, PortalAuthError> {
        match &self.discovery_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(&format!("{}/.well-known/openid-configuration", self.issuer))
                .map_err(|e| PortalAuthError::InvalidUrl(e.to_string())),
        }
    }

    /// The absolute post-logout target. Paths are resolved against the origin
    /// of the redirect URI, which is the portal's own origin.
    pub fn post_logout_redirect_url(&self) -> Result<Url, PortalAuthError> {
        let target = self.post_logout_redirect.as_str();
        if target.starts_with("http://") || target.starts_with("https://") {
            return Url::parse(target).map_err(|e| PortalAuthError::InvalidUrl(e.to_string()));
        }
        self.redirect_uri
            .join(target)
            .map_err(|e| PortalAuthError::InvalidUrl(e.to_string()))
    }
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    issuer: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<Url>,
    discovery_url: Option<Url>,
    scopes: Option<String>,
    acr_values: Option<String>,
    post_logout_redirect: Option<String>,
    login_path: Option<String>,
    default_post_login_path: Option<String>,
    validation: ValidationDetails,
    cookies: CookieSettings,
    http: HttpSettings,
    cache: CacheSettings,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer URL of the identity provider. Required.
    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.trim().trim_end_matches('/').to_string());
        self
    }

    /// Sets the client ID of the application. Required.
    pub fn client_id(mut self, client_id: String) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn client_secret(mut self, secret: String) -> Self {
        self.client_secret = Some(secret);
        self
    }

    /// Sets the redirect URI registered with the provider. Required.
    pub fn redirect_uri(mut self, url: &str) -> Result<Self, PortalAuthError> {
        let parsed = Url::parse(url).map_err(|e| PortalAuthError::InvalidUrl(e.to_string()))?;
        self.redirect_uri = Some(parsed);
        Ok(self)
    }

    /// Sets an explicit discovery document URL.
    pub fn discovery_url(mut self, url: &str) -> Result<Self, PortalAuthError> {
        let parsed = Url::parse(url).map_err(|e| PortalAuthError::InvalidUrl(e.to_string()))?;
        self.discovery_url = Some(parsed);
        Ok(self)
    }

    pub fn scopes(mut self, scopes: String) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn acr_values(mut self, acr_values: String) -> Self {
        self.acr_values = Some(acr_values);
        self
    }

    pub fn post_logout_redirect(mut self, target: String) -> Self {
        self.post_logout_redirect = Some(target);
        self
    }

    pub fn login_path(mut self, path: String) -> Self {
        self.login_path = Some(path);
        self
    }

    pub fn default_post_login_path(mut self, path: String) -> Self {
        self.default_post_login_path = Some(path);
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Restricts the RSA moduli the primary verifier handles. Keys outside the
    /// range are verified by the manual RS256 path instead.
    pub fn primary_modulus_bits(mut self, bits: RangeInclusive<usize>) -> Self {
        self.validation.primary_modulus_bits = bits;
        self
    }

    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.cookies.secure = secure;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http.timeout = timeout;
        self
    }

    pub fn discovery_ttl(mut self, ttl: Duration) -> Self {
        self.cache.discovery_ttl = Some(ttl);
        self
    }

    pub fn key_ttl(mut self, ttl: Duration) -> Self {
        self.cache.key_ttl = Some(ttl);
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `issuer`, `client_id` or `redirect_uri` is missing.
    pub fn build(self) -> Result<Config, PortalAuthError> {
        let issuer = self
            .issuer
            .filter(|issuer| !issuer.is_empty())
            .ok_or(PortalAuthError::MissingConfiguration("issuer".to_string()))?;
        let client_id = self
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(PortalAuthError::MissingConfiguration("client_id".to_string()))?;
        let redirect_uri = self
            .redirect_uri
            .ok_or(PortalAuthError::MissingConfiguration("redirect_uri".to_string()))?;

        Ok(Config {
            issuer,
            client_id,
            client_secret: self.client_secret,
            redirect_uri,
            discovery_url: self.discovery_url,
            scopes: self.scopes.unwrap_or_else(|| DEFAULT_SCOPES.to_string()),
            acr_values: self.acr_values,
            post_logout_redirect: self
                .post_logout_redirect
                .unwrap_or_else(|| DEFAULT_POST_LOGOUT_REDIRECT.to_string()),
            login_path: self.login_path.unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            default_post_login_path: self
                .default_post_login_path
                .unwrap_or_else(|| DEFAULT_POST_LOGIN_PATH.to_string()),
            validation: self.validation,
            cookies: self.cookies,
            http: self.http,
            cache: self.cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("GUBUY_ISSUER", "https://auth-testing.iduruguay.gub.uy/oidc/v1/"),
        ("GUBUY_CLIENT_ID", "portal"),
        ("GUBUY_REDIRECT_URI", "http://localhost:3000/api/auth/callback"),
    ];

    #[test]
    fn from_lookup_applies_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.issuer, "https://auth-testing.iduruguay.gub.uy/oidc/v1");
        assert_eq!(config.scopes, DEFAULT_SCOPES);
        assert_eq!(config.login_path, "/login");
        assert!(config.client_secret.is_none());
        assert!(!config.cookies.secure);
        assert_eq!(
            config.discovery_url().unwrap().as_str(),
            "https://auth-testing.iduruguay.gub.uy/oidc/v1/.well-known/openid-configuration"
        );
        assert_eq!(
            config.post_logout_redirect_url().unwrap().as_str(),
            "http://localhost:3000/login"
        );
    }

    #[test]
    fn from_lookup_reports_missing_required_variable() {
        let result = Config::from_lookup(lookup(&REQUIRED[..2]));
        assert!(matches!(result, Err(PortalAuthError::MissingConfiguration(name)) if name == "GUBUY_REDIRECT_URI"));
    }

    #[test]
    fn from_lookup_reads_optional_variables() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("GUBUY_CLIENT_SECRET", "s3cret"),
            ("GUBUY_WELL_KNOWN_URL", "https://idp.example/custom/.well-known/openid-configuration"),
            ("GUBUY_ACR_VALUES", "urn:iduruguay:nid:2"),
            ("GUBUY_POST_LOGOUT_REDIRECT_URI", "https://portal.example/bye"),
            ("GUBUY_HTTP_TIMEOUT_SECS", "3"),
            ("PORTAL_ENV", "production"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.discovery_url().unwrap().as_str(),
            "https://idp.example/custom/.well-known/openid-configuration"
        );
        assert_eq!(config.acr_values.as_deref(), Some("urn:iduruguay:nid:2"));
        assert_eq!(config.post_logout_redirect_url().unwrap().as_str(), "https://portal.example/bye");
        assert_eq!(config.http.timeout, Duration::from_secs(3));
        assert!(config.cookies.secure);
    }

    #[test]
    fn from_lookup_rejects_bad_timeout() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("GUBUY_HTTP_TIMEOUT_SECS", "soon"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(PortalAuthError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn builder_requires_issuer() {
        let result = ConfigBuilder::new()
            .client_id("portal".to_string())
            .redirect_uri("http://localhost:3000/api/auth/callback")
            .unwrap()
            .build();
        assert!(matches!(result, Err(PortalAuthError::MissingConfiguration(name)) if name == "issuer"));
    }
}
