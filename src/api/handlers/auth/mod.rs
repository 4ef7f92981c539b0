//! Auth handlers and supporting modules.
//!
//! Sign-in is two-step when two-factor is enabled: the password step parks
//! the login in [`state::ChallengeState`] and sets a short-lived challenge
//! cookie; the completion endpoint in [`two_factor`] exchanges it for a
//! session. The session endpoint is the authoritative check the gateway's
//! optimistic cookie inspection defers to, and it owns the recheck marker
//! cookie that keeps a stale session cookie from bouncing the browser
//! between login and home forever.

pub(crate) mod sessions;
mod state;
pub(crate) mod two_factor;
pub(crate) mod types;
mod utils;

pub use state::{AuthConfig, AuthState, ChallengeState};
pub(crate) use utils::extract_client_ip;

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::error;

use crate::error::AuthError;
use crate::gate::cookie_value;
use crate::provider::{ClientMeta, SessionRecord, UserRecord};
use types::{SessionResponse, SignInRequest, SignInResponse, SignInState, UserSummary};
use utils::{normalize_email, user_agent, valid_email};

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests;

#[utoipa::path(
    post,
    path = "/v1/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = SignInResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 503, description = "Identity provider unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn sign_in(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInRequest>>,
) -> impl IntoResponse {
    let request: SignInRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email_normalized = normalize_email(&request.email);
    if !valid_email(&email_normalized) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing password".to_string()).into_response();
    }

    let config = auth_state.config();
    let device_id = cookie_value(&headers, config.device_cookie()).map(str::to_string);

    let check = match auth_state
        .provider()
        .verify_credentials(&email_normalized, &request.password, device_id.as_deref())
        .await
    {
        Ok(check) => check,
        Err(err) => return error_response(&err, "Sign in failed").into_response(),
    };

    if check.two_factor_required {
        let challenge = match auth_state.challenges().store(check.user.id).await {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to store sign-in challenge: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Sign in failed".to_string(),
                )
                    .into_response();
            }
        };
        let mut response_headers = HeaderMap::new();
        if let Ok(cookie) = build_cookie(
            config.challenge_cookie(),
            &challenge,
            i64::try_from(config.challenge_ttl_seconds()).unwrap_or(i64::MAX),
            config.session_cookie_secure(),
        ) {
            response_headers.insert(SET_COOKIE, cookie);
        }
        let body = SignInResponse {
            state: SignInState::AwaitingTwoFactor,
            user: None,
        };
        return (StatusCode::OK, response_headers, Json(body)).into_response();
    }

    let meta = ClientMeta {
        ip_address: extract_client_ip(&headers),
        user_agent: user_agent(&headers),
    };
    match auth_state
        .provider()
        .issue_session(check.user.id, &meta, None)
        .await
    {
        Ok(session) => authenticated_response(auth_state.config(), &session).into_response(),
        Err(err) => error_response(&err, "Sign in failed").into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/sign-out",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn sign_out(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers, auth_state.config()) {
        if let Err(err) = auth_state.provider().revoke_session(&token).await {
            error!("Failed to revoke session: {err}");
        }
    }

    // Always clear the cookie, even if revocation failed or there was no
    // session to revoke.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_cookie(
        auth_state.config().session_cookie(),
        auth_state.config().session_cookie_secure(),
    ) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session"),
        (status = 503, description = "Identity provider unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let config = auth_state.config();
    // No token presented is a plain "no session"; there is nothing stale to
    // mark for recheck.
    let Some(token) = extract_session_token(&headers, config) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match auth_state.provider().validate_session(&token).await {
        Ok(Some(session)) => {
            let body = SessionResponse {
                user_id: session.user.id.to_string(),
                email: session.user.email,
                role: session.user.role,
                two_factor_enabled: session.user.two_factor_enabled,
                expires_at_unix: session.expires_at_unix,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(None) => {
            // The cookie the gateway saw is dead. Clear it and set the
            // recheck marker so the login page stays reachable on the next
            // pass through the gateway.
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = clear_cookie(config.session_cookie(), config.session_cookie_secure())
            {
                response_headers.append(SET_COOKIE, cookie);
            }
            if let Ok(cookie) = recheck_cookie(config) {
                response_headers.append(SET_COOKIE, cookie);
            }
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
        Err(err) => {
            error!("Session validation failed: {err}");
            // Keep the session cookie; the token may still be good once the
            // provider is back. The marker alone keeps login reachable.
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = recheck_cookie(config) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                response_headers,
                "Service unavailable".to_string(),
            )
                .into_response()
        }
    }
}

/// Resolve the presented token into a validated session, or the response
/// the handler should return instead.
pub(super) async fn require_session(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<SessionRecord, (StatusCode, String)> {
    let Some(token) = extract_session_token(headers, auth_state.config()) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "Authentication required".to_string(),
        ));
    };
    match auth_state.provider().validate_session(&token).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err((
            StatusCode::UNAUTHORIZED,
            "Authentication required".to_string(),
        )),
        Err(err) => {
            error!("Session validation failed: {err}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            ))
        }
    }
}

/// Issue-session success body plus the session cookie.
pub(super) fn authenticated_response(
    config: &AuthConfig,
    session: &SessionRecord,
) -> (StatusCode, HeaderMap, Json<SignInResponse>) {
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(config, &session.token) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    let body = SignInResponse {
        state: SignInState::Authenticated,
        user: Some(summarize(&session.user)),
    };
    (StatusCode::OK, response_headers, Json(body))
}

pub(super) fn summarize(user: &UserRecord) -> UserSummary {
    UserSummary {
        user_id: user.id.to_string(),
        email: user.email.clone(),
        role: user.role.clone(),
        two_factor_enabled: user.two_factor_enabled,
    }
}

/// Map a provider error onto a status and a client-safe message. `context`
/// names the operation in logs and in the generic fallback.
pub(super) fn error_response(err: &AuthError, context: &str) -> (StatusCode, String) {
    match err {
        AuthError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
        AuthError::Authentication => (
            StatusCode::UNAUTHORIZED,
            "Invalid credentials".to_string(),
        ),
        AuthError::RateLimited { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string())
        }
        AuthError::Forbidden(reason) => (StatusCode::FORBIDDEN, (*reason).to_string()),
        AuthError::DependencyUnavailable(inner) => {
            error!("{context}: {inner}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            )
        }
        AuthError::Internal(inner) => {
            error!("{context}: {inner}");
            (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}

/// Build a `HttpOnly` cookie with the given lifetime.
pub(super) fn build_cookie(
    name: &str,
    value: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(name, "", 0, secure)
}

pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        config.session_cookie(),
        token,
        config.session_cookie_max_age_seconds(),
        config.session_cookie_secure(),
    )
}

fn recheck_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        config.recheck_cookie(),
        "1",
        config.recheck_max_age_seconds(),
        config.session_cookie_secure(),
    )
}

/// Bearer header first, then the session cookie.
pub(super) fn extract_session_token(headers: &HeaderMap, config: &AuthConfig) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    cookie_value(headers, config.session_cookie()).map(str::to_string)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
