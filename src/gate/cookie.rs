//! Session-cookie inspection for the gate.
//!
//! The gate never validates a session against the identity provider; it only
//! checks that a cookie with the configured name is present and shaped like a
//! token. Deep validation happens on the session endpoint, which clears the
//! cookie and sets the recheck marker when the token turns out to be stale.

use axum::http::{header::COOKIE, HeaderMap};

/// Upper bound for a plausible session token. Anything longer is treated as
/// malformed rather than forwarded around.
const MAX_TOKEN_LEN: usize = 512;

/// Look up a cookie by exact name in the request `Cookie` header.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (cookie_name, value) = pair.trim().split_once('=')?;
        (cookie_name == name).then_some(value)
    })
}

/// `true` when the named cookie is present and its value looks like a token.
#[must_use]
pub fn has_session_cookie(headers: &HeaderMap, name: &str) -> bool {
    cookie_value(headers, name).is_some_and(well_formed_token)
}

/// Shape check for opaque tokens: non-empty, bounded length, and restricted
/// to URL-safe base64 characters plus `.` so signed token formats pass.
#[must_use]
pub fn well_formed_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TOKEN_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'))
}
