// src/routes.rs

use crate::flow::{Authenticator, CallbackParams, LOGIN_UNREACHABLE_MESSAGE};
use crate::session::PortalSession;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "redirectTo")]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CiLoginForm {
    pub ci: Option<String>,
    #[serde(rename = "redirectTo")]
    pub redirect_to: Option<String>,
}

/// The `/api/auth` routes.
pub fn router(auth: Authenticator) -> Router {
    Router::new()
        .route("/api/auth/login", get(login))
        .route("/api/auth/callback", get(callback))
        .route("/api/auth/logout", get(logout).post(logout))
        .route("/api/auth/session", get(session))
        .route("/api/auth/ci-login", post(ci_login))
        .with_state(auth)
}

async fn login(
    State(auth): State<Authenticator>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> (CookieJar, Redirect) {
    match auth.begin_login(jar.clone(), query.redirect_to.as_deref()).await {
        Ok((jar, url)) => (jar, Redirect::temporary(url.as_str())),
        Err(e) => {
            error!(error = %e, "Failed to initiate GUB.UY login");
            (jar, Redirect::temporary(&auth.login_error_location(LOGIN_UNREACHABLE_MESSAGE)))
        }
    }
}

async fn callback(
    State(auth): State<Authenticator>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    let (jar, outcome) = auth.complete_login(jar, params).await;
    let location = auth.callback_location(&outcome);
    (jar, Redirect::temporary(&location))
}

async fn logout(State(auth): State<Authenticator>, jar: CookieJar) -> (CookieJar, Redirect) {
    let (jar, target) = auth.logout(jar).await;
    (jar, Redirect::to(&target))
}

async fn session(
    State(auth): State<Authenticator>,
    jar: CookieJar,
) -> Result<Json<PortalSession>, StatusCode> {
    auth.session(&jar)
        .filter(PortalSession::is_authenticated)
        .map(Json)
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn ci_login(
    State(auth): State<Authenticator>,
    jar: CookieJar,
    Form(form): Form<CiLoginForm>,
) -> (CookieJar, Redirect) {
    let (jar, target) = auth.guest_login(jar, form.ci.as_deref(), form.redirect_to.as_deref());
    (jar, Redirect::to(&target))
}
