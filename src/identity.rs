//! Turns verified ID token claims and userinfo into a [`PortalSession`].

use crate::model::TokenResponse;
use crate::session::{AccessDescriptor, Party, PortalSession, SessionTokens, DOCUMENT_NUMBER_ATTRIBUTE};
use crate::validator::IdTokenClaims;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const ACCESS_SOURCE: &str = "GUBUY_OIDC";
pub const UNKNOWN_DOCUMENT: &str = "unknown";

const PLACEHOLDER_WORKER: (&str, &str) = ("gubuy-worker-placeholder", "Profesional asignado");
const PLACEHOLDER_CLINIC: (&str, &str) = ("gubuy-clinic-placeholder", "Centro de Salud");

/// The user's identity as resolved from both claim sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub document_number: String,
    pub email: Option<String>,
    pub full_name: String,
    /// Identity assurance level.
    pub nid: Option<String>,
    pub issuer: Option<String>,
    pub idp: Option<String>,
}

impl Identity {
    /// Resolves each attribute, userinfo first where the provider sends both.
    pub fn resolve(token: &IdTokenClaims, user_info: Option<&Map<String, Value>>) -> Self {
        let user = |name: &str| {
            user_info
                .and_then(|claims| claims.get(name))
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
        };

        let document_number = user("numero_documento")
            .or_else(|| token.string("numero_documento"))
            .or_else(|| token.string("uid"))
            .or_else(|| token.subject())
            .unwrap_or(UNKNOWN_DOCUMENT)
            .to_string();

        let email = user("email").or_else(|| token.string("email")).map(str::to_string);

        let joined = [
            user("primer_nombre").or_else(|| token.string("given_name")),
            user("primer_apellido").or_else(|| token.string("family_name")),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

        let full_name = user("nombre_completo")
            .or_else(|| token.string("nombre_completo"))
            .map(str::to_string)
            .or_else(|| Some(joined).filter(|name| !name.is_empty()))
            .or_else(|| token.string("name").map(str::to_string))
            .or_else(|| email.clone())
            .unwrap_or_else(|| document_number.clone());

        Self {
            email,
            full_name,
            nid: user("nid").or_else(|| token.string("nid")).map(str::to_string),
            issuer: token.issuer().map(str::to_string),
            idp: user("idp").or_else(|| token.string("idp")).map(str::to_string),
            document_number,
        }
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert(DOCUMENT_NUMBER_ATTRIBUTE.to_string(), self.document_number.clone());
        let optional = [
            ("email", &self.email),
            ("nid", &self.nid),
            ("issuer", &self.issuer),
            ("idp", &self.idp),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                attributes.insert(name.to_string(), value.clone());
            }
        }
        attributes
    }

    /// Builds the session record issued at `now`.
    pub fn into_session(self, tokens: &TokenResponse, now: DateTime<Utc>) -> PortalSession {
        let expires_at = tokens
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now.timestamp_millis().saturating_add(secs.saturating_mul(1000)));

        PortalSession {
            attributes: self.attributes(),
            health_user: Party { id: self.document_number, name: self.full_name.clone() },
            health_worker: Party {
                id: PLACEHOLDER_WORKER.0.to_string(),
                name: PLACEHOLDER_WORKER.1.to_string(),
            },
            clinic: Party {
                id: PLACEHOLDER_CLINIC.0.to_string(),
                name: PLACEHOLDER_CLINIC.1.to_string(),
            },
            access: AccessDescriptor {
                source: ACCESS_SOURCE.to_string(),
                message: format!("Sesion iniciada como {}", self.full_name),
            },
            issued_at: now,
            tokens: Some(SessionTokens { id_token: tokens.id_token.clone(), expires_at }),
        }
    }
}
