// src/validator.rs

pub mod rs256;

use crate::client::JwksClient;
use crate::config::{Config, ValidationDetails};
use crate::discovery::DiscoveryCache;
use crate::error::PortalAuthError;
use crate::legacy::LegacyKeyCache;
use crate::model::OpenIdConfiguration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

/// The claims of a verified ID token.
///
/// Standard claims have accessors; provider specific ones (`numero_documento`,
/// `nid`, `idp`, ...) are read with [`IdTokenClaims::string`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IdTokenClaims(Map<String, Value>);

impl IdTokenClaims {
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// A string claim, ignoring blank values.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// A numeric claim such as `exp`.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.string("iss")
    }

    pub fn subject(&self) -> Option<&str> {
        self.string("sub")
    }

    pub fn nonce(&self) -> Option<&str> {
        self.string("nonce")
    }

    /// Whether `aud`, a string or an array of strings, names `client_id`.
    pub fn audience_contains(&self, client_id: &str) -> bool {
        match self.0.get("aud") {
            Some(Value::String(aud)) => aud == client_id,
            Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(client_id)),
            _ => false,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// The ID token verifier.
///
/// Created once and shared. Tokens are verified with `jsonwebtoken` against
/// the provider's JWKS; when the signing key is one that library cannot use
/// (an RSA modulus outside [`ValidationDetails::primary_modulus_bits`]), the
/// token is verified again by the manual RS256 path in [`rs256`].
#[derive(Clone)]
pub struct Validator {
    client_id: String,
    validation: ValidationDetails,
    discovery: DiscoveryCache,
    jwks_client: JwksClient,
    legacy_keys: LegacyKeyCache,
}

impl Validator {
    /// Creates a new `Validator` sharing the given HTTP client and discovery cache.
    pub fn new(config: &Config, http_client: reqwest::Client, discovery: DiscoveryCache) -> Self {
        let key_ttl = config.cache.key_ttl;
        Self {
            client_id: config.client_id.clone(),
            validation: config.validation.clone(),
            jwks_client: JwksClient::new(http_client.clone(), discovery.clone(), key_ttl),
            legacy_keys: LegacyKeyCache::new(http_client, discovery.clone(), key_ttl),
            discovery,
        }
    }

    /// Verifies an ID token and returns its claims.
    ///
    /// Checks the signature, that `iss` is the discovered issuer, that `aud`
    /// contains the client id, and the `exp`/`nbf` validity window. The nonce
    /// is left to the caller, who knows which one was issued.
    #[instrument(skip(self, id_token), err)]
    pub async fn verify(&self, id_token: &str) -> Result<IdTokenClaims, PortalAuthError> {
        let document = self.discovery.get().await?;

        match self.verify_with_jwks(id_token, &document).await {
            Err(e) if e.is_fallback_trigger() => {
                warn!("Primary ID token verification unavailable ({}); using manual RS256 verification", e);
                self.verify_with_legacy_key(id_token, &document).await
            }
            result => result,
        }
    }

    /// Drops every cached verification key.
    pub fn refresh_keys(&self) {
        self.jwks_client.refresh();
        self.legacy_keys.refresh();
    }

    async fn verify_with_jwks(
        &self,
        id_token: &str,
        document: &OpenIdConfiguration,
    ) -> Result<IdTokenClaims, PortalAuthError> {
        // 1. Decode header to get kid and alg without validation.
        let header = decode_header(id_token)?;

        // 2. Check if the algorithm is allowed.
        if !self.validation.algorithms.contains(&header.alg) {
            return Err(PortalAuthError::UnsupportedAlgorithm(header.alg));
        }

        // 3. Construct validation options.
        let mut validation = Validation::new(header.alg);
        validation.leeway = self.validation.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[document.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        // 4. Try each candidate key the library can handle. Claim errors mean
        // the signature already verified, so they end the search.
        let keys = self.jwks_client.get_keys(header.kid.as_deref()).await?;
        let mut unsupported_bits = None;
        let mut signature_error = None;
        for key in keys {
            if !self.validation.primary_modulus_bits.contains(&key.modulus_bits) {
                unsupported_bits.get_or_insert(key.modulus_bits);
                continue;
            }
            match decode::<IdTokenClaims>(id_token, &key.decoding_key, &validation) {
                Ok(token_data) => {
                    debug!("ID token verified with the provider JWKS");
                    return Ok(token_data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => signature_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }

        // 5. Hand keys the library refuses to the fallback.
        match (unsupported_bits, signature_error) {
            (Some(bits), _) => Err(PortalAuthError::UnsupportedKeySize { bits }),
            (None, Some(e)) => Err(e.into()),
            (None, None) => Err(PortalAuthError::KeyNotFound(
                header.kid.unwrap_or_else(|| "<none>".to_string()),
            )),
        }
    }

    async fn verify_with_legacy_key(
        &self,
        id_token: &str,
        document: &OpenIdConfiguration,
    ) -> Result<IdTokenClaims, PortalAuthError> {
        let header = decode_header(id_token)?;
        if header.alg != Algorithm::RS256 {
            return Err(PortalAuthError::UnsupportedAlgorithm(header.alg));
        }

        let jwk = self.legacy_keys.resolve(header.kid.as_deref()).await?;
        let claims = rs256::verify_signature(id_token, &jwk)?;
        rs256::validate_claims(
            &claims,
            &document.issuer,
            &self.client_id,
            now_secs(),
            self.validation.leeway.as_secs(),
        )?;
        debug!("ID token verified with the manual RS256 path");
        Ok(claims)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
