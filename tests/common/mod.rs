#![allow(dead_code)]

use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::Response;
use axum_extra::extract::cookie::Cookie;
use gubuy_portal_auth::prelude::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "portal-client";
pub const REDIRECT_URI: &str = "http://localhost:3000/api/auth/callback";

pub const PROVIDER_2048: &str = include_str!("../fixtures/provider_2048.pem");
pub const FOREIGN_2048: &str = include_str!("../fixtures/foreign_2048.pem");
pub const PROVIDER_4096: &str = include_str!("../fixtures/provider_4096.pem");
pub const LEGACY_1024: &str = include_str!("../fixtures/legacy_1024.pem");
pub const FOREIGN_1024: &str = include_str!("../fixtures/foreign_1024.pem");

pub fn private_key(pem: &str) -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(pem).unwrap()
}

/// The public half of `key` as a JWK.
pub fn jwk(key: &RsaPrivateKey, kid: Option<&str>) -> Value {
    let public_key = key.to_public_key();
    let mut jwk = json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "n": base64_url::encode(&public_key.n().to_bytes_be()),
        "e": base64_url::encode(&public_key.e().to_bytes_be()),
    });
    if let Some(kid) = kid {
        jwk["kid"] = json!(kid);
    }
    jwk
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Claims a GUB.UY ID token carries for a test user.
pub fn id_token_claims(issuer: &str, nonce: &str) -> Value {
    let now = now();
    json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": "456",
        "iat": now,
        "exp": now + 300,
        "nonce": nonce,
        "given_name": "Ana",
        "family_name": "Pérez",
        "email": "ana@example.uy",
        "nid": "2",
        "idp": "cedula",
    })
}

/// Signs with `jsonwebtoken`, for keys `ring` accepts.
pub fn sign(key: &RsaPrivateKey, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let der = key.to_pkcs1_der().unwrap();
    encode(&header, claims, &EncodingKey::from_rsa_der(der.as_bytes())).unwrap()
}

/// Signs with the `rsa` crate directly, for keys `ring` refuses.
pub fn sign_manually(key: &RsaPrivateKey, kid: Option<&str>, claims: &Value) -> String {
    let mut header = json!({ "alg": "RS256", "typ": "JWT" });
    if let Some(kid) = kid {
        header["kid"] = json!(kid);
    }
    let signing_input = format!(
        "{}.{}",
        base64_url::encode(&header.to_string()),
        base64_url::encode(&claims.to_string())
    );
    let digest = Sha256::digest(signing_input.as_bytes());
    let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
    format!("{signing_input}.{}", base64_url::encode(&signature))
}

/// A stub GUB.UY provider.
pub struct Provider {
    pub server: MockServer,
}

impl Provider {
    /// Serves discovery (with userinfo and end-session endpoints) and `jwks`.
    pub async fn start(jwks: Vec<Value>) -> Self {
        let provider = Self { server: MockServer::start().await };
        provider.publish(jwks).await;
        provider
    }

    /// Replaces every mock with discovery and a JWKS of `jwks` only.
    pub async fn rotate_keys(&self, jwks: Vec<Value>) {
        self.server.reset().await;
        self.publish(jwks).await;
    }

    async fn publish(&self, jwks: Vec<Value>) {
        let uri = self.server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": uri,
                "authorization_endpoint": format!("{uri}/authorize"),
                "token_endpoint": format!("{uri}/token"),
                "userinfo_endpoint": format!("{uri}/userinfo"),
                "end_session_endpoint": format!("{uri}/logout"),
                "jwks_uri": format!("{uri}/jwks"),
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": jwks })))
            .mount(&self.server)
            .await;
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .issuer(&self.issuer())
            .client_id(CLIENT_ID.to_string())
            .redirect_uri(REDIRECT_URI)
            .unwrap()
    }

    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.config().build().unwrap()).unwrap()
    }

    /// The token endpoint answers every exchange with `id_token`.
    pub async fn issue(&self, id_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-token",
                "id_token": id_token,
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn user_info(&self, claims: Value) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims))
            .mount(&self.server)
            .await;
    }
}

/// The `Set-Cookie` headers of a response, by cookie name.
pub fn set_cookies(response: &Response<Body>) -> HashMap<String, Cookie<'static>> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| Cookie::parse_encoded(value.to_str().unwrap().to_string()).unwrap())
        .map(|cookie| (cookie.name().to_string(), cookie))
        .collect()
}

/// A `Cookie` request header carrying `cookies`.
pub fn cookie_header<'a>(cookies: impl IntoIterator<Item = &'a Cookie<'static>>) -> String {
    cookies
        .into_iter()
        .map(|cookie| cookie.encoded().stripped().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn is_expired(cookie: &Cookie<'_>) -> bool {
    cookie.value().is_empty() && cookie.max_age() == Some(time::Duration::ZERO)
}
