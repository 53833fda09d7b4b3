// src/cookies.rs

use crate::config::CookieSettings;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

pub const STATE_COOKIE: &str = "gubuy_oauth_state";
pub const VERIFIER_COOKIE: &str = "gubuy_oauth_code_verifier";
pub const NONCE_COOKIE: &str = "gubuy_oauth_nonce";
pub const REDIRECT_COOKIE: &str = "gubuy_post_login_redirect";
pub const SESSION_COOKIE: &str = "portal_session";
pub const GUEST_CI_COOKIE: &str = "guest_ci";

/// The cookies that carry one authorization round trip.
pub const ROUND_TRIP_COOKIES: [&str; 4] = [STATE_COOKIE, VERIFIER_COOKIE, NONCE_COOKIE, REDIRECT_COOKIE];

pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;
pub const REDIRECT_MAX_AGE_SECS: i64 = 15 * 60;
pub const SESSION_MAX_AGE_SECS: i64 = 8 * 60 * 60;

/// An `HttpOnly`, `SameSite=Lax` cookie.
pub fn create_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
    settings: &CookieSettings,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path(settings.path.clone())
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// An already expired cookie that makes the user agent drop `name`.
pub fn clear_cookie(name: &'static str, settings: &CookieSettings) -> Cookie<'static> {
    create_cookie(name, String::new(), 0, settings)
}

/// Expires all four round-trip cookies.
pub fn purge_round_trip(jar: CookieJar, settings: &CookieSettings) -> CookieJar {
    ROUND_TRIP_COOKIES
        .into_iter()
        .fold(jar, |jar, name| jar.add(clear_cookie(name, settings)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_cookies_expire_immediately() {
        let settings = CookieSettings { secure: true, ..Default::default() };
        let jar = purge_round_trip(CookieJar::new(), &settings);

        for name in ROUND_TRIP_COOKIES {
            let cookie = jar.get(name).unwrap();
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
            assert_eq!(cookie.secure(), Some(true));
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.same_site(), Some(SameSite::Lax));
            assert_eq!(cookie.path(), Some("/"));
        }
    }
}
