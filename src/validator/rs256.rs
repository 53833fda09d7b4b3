//! Manual RS256 verification for keys the primary verifier refuses.
//!
//! Builds the RSA public key straight from the JWK's `n`/`e` with a generous
//! modulus limit, checks the PKCS#1 v1.5 SHA-256 signature over
//! `{header}.{payload}`, then validates the claims itself.

use super::IdTokenClaims;
use crate::error::PortalAuthError;
use crate::model::JsonWebKey;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Largest modulus accepted here.
pub const MAX_MODULUS_BITS: usize = 16384;

/// Path suffixes the provider is known to append to its issuer in `iss`.
const ISSUER_VARIANTS: [&str; 3] = ["", "/oidc", "/oidc/v1"];

/// Verifies the token's signature with `jwk` and returns the unvalidated claims.
pub fn verify_signature(token: &str, jwk: &JsonWebKey) -> Result<IdTokenClaims, PortalAuthError> {
    let mut segments = token.split('.');
    let (header, payload, signature) = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => (h, p, s),
        _ => return Err(PortalAuthError::MalformedToken("ID token has an invalid format".to_string())),
    };

    let public_key = public_key(jwk)?;
    let signature = decode_segment(signature)?;

    let mut hasher = Sha256::new();
    hasher.update(header.as_bytes());
    hasher.update(b".");
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| PortalAuthError::InvalidSignature)?;

    serde_json::from_slice(&decode_segment(payload)?)
        .map_err(|e| PortalAuthError::MalformedToken(format!("payload is not a JSON object: {e}")))
}

/// Re-validates issuer, audience and the time claims, allowing `tolerance`
/// seconds of clock skew. `exp` is required; `nbf` and `iat` are checked only
/// when present.
pub fn validate_claims(
    claims: &IdTokenClaims,
    issuer: &str,
    client_id: &str,
    now: u64,
    tolerance: u64,
) -> Result<(), PortalAuthError> {
    let expected = issuer.trim_end_matches('/');
    let token_issuer = claims.issuer().map(|iss| iss.trim_end_matches('/')).unwrap_or_default();
    let issuer_matches = !token_issuer.is_empty()
        && ISSUER_VARIANTS
            .iter()
            .any(|suffix| token_issuer == format!("{expected}{suffix}"));
    if !issuer_matches {
        return Err(PortalAuthError::InvalidClaims("Unexpected ID token issuer".to_string()));
    }

    if !claims.audience_contains(client_id) {
        return Err(PortalAuthError::InvalidClaims(
            "ID token audience does not include the configured client id".to_string(),
        ));
    }

    let now = now as f64;
    let tolerance = tolerance as f64;
    let exp = claims
        .number("exp")
        .ok_or_else(|| PortalAuthError::InvalidClaims("ID token has no exp".to_string()))?;
    if exp + tolerance < now {
        return Err(PortalAuthError::InvalidClaims("ID token has expired".to_string()));
    }
    if claims.number("nbf").is_some_and(|nbf| nbf - tolerance > now) {
        return Err(PortalAuthError::InvalidClaims("ID token is not yet valid".to_string()));
    }
    if claims.number("iat").is_some_and(|iat| iat - tolerance > now) {
        return Err(PortalAuthError::InvalidClaims(
            "ID token issue time is in the future".to_string(),
        ));
    }
    Ok(())
}

fn public_key(jwk: &JsonWebKey) -> Result<RsaPublicKey, PortalAuthError> {
    let (n, e) = match (jwk.n.as_deref(), jwk.e.as_deref()) {
        (Some(n), Some(e)) if jwk.is_rsa() => (n, e),
        _ => {
            return Err(PortalAuthError::InvalidKeyFormat(
                "Unable to locate RSA key for ID token verification".to_string(),
            ))
        }
    };
    let n = BigUint::from_bytes_be(&decode_segment(n)?);
    let e = BigUint::from_bytes_be(&decode_segment(e)?);
    RsaPublicKey::new_with_max_size(n, e, MAX_MODULUS_BITS)
        .map_err(|e| PortalAuthError::InvalidKeyFormat(e.to_string()))
}

/// Base64url, with or without padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>, PortalAuthError> {
    base64_url::decode(segment.trim_end_matches('='))
        .map_err(|e| PortalAuthError::MalformedToken(format!("invalid base64url segment: {e}")))
}
