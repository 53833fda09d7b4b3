// src/lib.rs

pub mod client;
pub mod config;
pub mod cookies;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod identity;
pub mod legacy;
pub mod model;
pub mod pkce;
pub mod routes;
pub mod session;
pub mod token;
pub mod validator;

/// The public prelude for the `gubuy-portal-auth` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::PortalAuthError;
    pub use crate::flow::{Authenticator, CallbackOutcome, CallbackParams, LoginStage};
    pub use crate::model::{OpenIdConfiguration, TokenResponse};
    pub use crate::routes::router;
    pub use crate::session::{CookieSessionStore, PortalSession, SessionStore};
    pub use crate::validator::{IdTokenClaims, Validator};
    pub use jsonwebtoken::Algorithm;
}
