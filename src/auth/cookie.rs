//! Cookie parsing and building for session tokens.

use axum::http::header;

use crate::server_config;

/// Cookie name for the access token (short-lived, 5 minutes).
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh token (long-lived, 30 days).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

fn secure_suffix() -> &'static str {
    if server_config::secure_cookies() {
        "; Secure"
    } else {
        ""
    }
}

/// `Set-Cookie` value for a session token.
///
/// SameSite=Lax so the session survives following an emailed link.
pub fn session_cookie(name: &str, token: &str, max_age: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        name,
        token,
        max_age,
        secure_suffix()
    )
}

/// `Set-Cookie` value that removes a session cookie.
pub fn clear_cookie(name: &str) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}",
        name,
        secure_suffix()
    )
}
