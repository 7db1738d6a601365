use axum_extra::extract::cookie::{Cookie, SameSite};

use alma_shared::session::SESSION_COOKIE;

pub mod conversations;
pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod oauth;
pub mod onboarding;
pub mod resend;
pub mod verify;

/// HttpOnly, same-site session cookie carrying the opaque token.
pub fn session_cookie(token: &str, ttl_secs: u64) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(ttl_secs as i64));
    cookie
}

/// Removal cookie: same name and path, immediate expiry.
pub fn expired_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_locked_down() {
        let cookie = session_cookie("abc", 86400);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(86400)));
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let cookie = expired_session_cookie();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }
}
