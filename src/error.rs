// src/error.rs

use base64::DecodeError;
use jsonwebtoken::Algorithm;
use thiserror::Error;

/// The primary error type for the `gubuy-portal-auth` library.
#[derive(Debug, Error)]
pub enum PortalAuthError {
    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The provider's discovery document could not be loaded or parsed.
    #[error("OpenID discovery failed: {0}")]
    Discovery(String),

    /// An error occurred during an HTTP request.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint rejected the authorization code.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// The token endpoint answered successfully but the body is unusable.
    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),

    /// The ID token failed standard JWT verification (signature, issuer, audience, validity window).
    #[error("ID token verification failed: {0}")]
    SignatureVerification(#[from] jsonwebtoken::errors::Error),

    /// The RS256 signature did not verify against the resolved key.
    #[error("Invalid ID token signature")]
    InvalidSignature,

    /// The algorithm in the JWT header is not accepted.
    #[error("Unsupported ID token algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// No RSA key matching the token could be located.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// A JWK is malformed or not a usable RSA key.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The RSA modulus is outside the range the primary verifier accepts.
    #[error("RSA modulus of {bits} bits is outside the range supported by the primary verifier")]
    UnsupportedKeySize { bits: usize },

    /// The compact JWS could not be split or decoded.
    #[error("Malformed ID token: {0}")]
    MalformedToken(String),

    /// A claim failed validation on the manual verification path.
    #[error("Invalid ID token claims: {0}")]
    InvalidClaims(String),

    /// An error occurred while decoding a Base64URL encoded string.
    #[error("Base64URL decoding error: {0}")]
    Base64Decode(#[from] DecodeError),

    /// The `state` returned by the provider does not match the one issued at login.
    #[error("State mismatch: the returned state does not match the stored state")]
    StateMismatch,

    /// The nonce in the token does not match the nonce issued at login.
    #[error("Nonce mismatch: the nonce in the token does not match the expected nonce")]
    NonceMismatch,

    /// The provider redirected back without the parameters a callback needs.
    #[error("Invalid callback response: {0}")]
    InvalidCallbackResponse(String),

    /// The session record could not be serialized.
    #[error("Session encoding error: {0}")]
    SessionEncoding(#[from] serde_json::Error),
}

impl PortalAuthError {
    /// Whether the primary verifier gave up because of the key itself rather
    /// than the token, which is the only case the RS256 fallback handles.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(self, PortalAuthError::UnsupportedKeySize { .. })
    }
}
