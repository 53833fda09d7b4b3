// src/session.rs

use crate::config::CookieSettings;
use crate::cookies::{clear_cookie, create_cookie, SESSION_COOKIE, SESSION_MAX_AGE_SECS};
use crate::error::PortalAuthError;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DOCUMENT_NUMBER_ATTRIBUTE: &str = "numero_documento";

/// An id and display name pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub name: String,
}

/// How the session came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDescriptor {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    /// Sent back to the provider as `id_token_hint` at logout.
    pub id_token: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// The authenticated identity the rest of the portal reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalSession {
    pub health_user: Party,
    pub health_worker: Party,
    pub clinic: Party,
    pub access: AccessDescriptor,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<SessionTokens>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PortalSession {
    /// The user's identity document number, from the attributes or else the
    /// health user id.
    pub fn document_number(&self) -> Option<&str> {
        self.attributes
            .get(DOCUMENT_NUMBER_ATTRIBUTE)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(self.health_user.id.as_str()).filter(|id| !id.trim().is_empty()))
    }

    /// Sessions without a resolvable document number are anonymous.
    pub fn is_authenticated(&self) -> bool {
        self.document_number().is_some()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|tokens| tokens.id_token.as_str())
            .filter(|token| !token.is_empty())
    }
}

/// Where the session record lives between requests.
pub trait SessionStore: Send + Sync {
    /// The current session, or `None` when absent or unreadable.
    fn read(&self, jar: &CookieJar) -> Option<PortalSession>;

    fn write(&self, jar: CookieJar, session: &PortalSession) -> Result<CookieJar, PortalAuthError>;

    fn clear(&self, jar: CookieJar) -> CookieJar;
}

/// Keeps the session as JSON in a single `HttpOnly` cookie for 8 hours.
///
/// The cookie is not encrypted; deployments that need confidentiality at rest
/// must terminate it in a layer that does.
#[derive(Debug, Clone, Default)]
pub struct CookieSessionStore {
    settings: CookieSettings,
}

impl CookieSessionStore {
    pub fn new(settings: CookieSettings) -> Self {
        Self { settings }
    }
}

impl SessionStore for CookieSessionStore {
    fn read(&self, jar: &CookieJar) -> Option<PortalSession> {
        let cookie = jar.get(SESSION_COOKIE)?;
        match serde_json::from_str(cookie.value()) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("Ignoring unreadable session cookie: {}", e);
                None
            }
        }
    }

    fn write(&self, jar: CookieJar, session: &PortalSession) -> Result<CookieJar, PortalAuthError> {
        let value = serde_json::to_string(session)?;
        Ok(jar.add(create_cookie(SESSION_COOKIE, value, SESSION_MAX_AGE_SECS, &self.settings)))
    }

    fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(clear_cookie(SESSION_COOKIE, &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Cookie;

    fn session() -> PortalSession {
        PortalSession {
            health_user: Party { id: "12345678".to_string(), name: "Ana Pérez".to_string() },
            health_worker: Party { id: "w".to_string(), name: "Profesional".to_string() },
            clinic: Party { id: "c".to_string(), name: "Centro".to_string() },
            access: AccessDescriptor {
                source: "GUBUY_OIDC".to_string(),
                message: "Sesion iniciada como Ana Pérez".to_string(),
            },
            issued_at: Utc::now(),
            tokens: Some(SessionTokens { id_token: "a.b.c".to_string(), expires_at: Some(1_700_000_000_000) }),
            attributes: BTreeMap::from([
                ("numero_documento".to_string(), "12345678".to_string()),
                ("email".to_string(), "ana@example.uy".to_string()),
            ]),
        }
    }

    #[test]
    fn written_cookie_is_http_only_for_eight_hours() {
        let store = CookieSessionStore::default();
        let jar = store.write(CookieJar::new(), &session()).unwrap();

        let cookie = jar.get(SESSION_COOKIE).unwrap();
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(8)));
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let store = CookieSessionStore::default();
        let original = session();
        let jar = store.write(CookieJar::new(), &original).unwrap();
        assert_eq!(store.read(&jar).unwrap(), original);
    }

    #[test]
    fn serialized_form_uses_camel_case() {
        let value = serde_json::to_value(session()).unwrap();
        assert!(value.get("healthUser").is_some());
        assert!(value.get("issuedAt").is_some());
        assert_eq!(value["tokens"]["idToken"], "a.b.c");
    }

    #[test]
    fn unreadable_or_missing_cookie_reads_as_none() {
        let store = CookieSessionStore::default();
        assert!(store.read(&CookieJar::new()).is_none());

        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "{not json"));
        assert!(store.read(&jar).is_none());
    }

    #[test]
    fn clear_expires_the_cookie() {
        let store = CookieSessionStore::default();
        let jar = store.clear(store.write(CookieJar::new(), &session()).unwrap());
        let cookie = jar.get(SESSION_COOKIE).unwrap();
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert!(store.read(&jar).is_none());
    }

    #[test]
    fn document_number_falls_back_to_health_user_id() {
        let mut anonymous = session();
        anonymous.attributes.clear();
        assert_eq!(anonymous.document_number(), Some("12345678"));

        anonymous.health_user.id = String::new();
        assert!(!anonymous.is_authenticated());
    }
}
