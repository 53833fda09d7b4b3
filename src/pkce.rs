//! Random values and the S256 PKCE challenge (RFC 7636) used during login.

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy behind the `state` parameter.
pub const STATE_BYTES: usize = 32;
/// Bytes of entropy behind the PKCE code verifier (86 characters once encoded).
pub const VERIFIER_BYTES: usize = 64;
/// Bytes of entropy behind the `nonce` parameter.
pub const NONCE_BYTES: usize = 32;

/// URL-safe base64 of `byte_length` bytes from the operating system's CSPRNG.
pub fn create_random_string(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn create_pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_is_url_safe_and_sized() {
        let verifier = create_random_string(VERIFIER_BYTES);
        assert_eq!(verifier.len(), 86);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(create_random_string(STATE_BYTES).len(), 43);
    }

    #[test]
    fn random_strings_differ() {
        assert_ne!(create_random_string(NONCE_BYTES), create_random_string(NONCE_BYTES));
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            create_pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
