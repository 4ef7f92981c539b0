//! Two-factor endpoints: enrollment management plus the sign-in challenge
//! completion.
//!
//! Enable, verify, and disable operate on the authenticated session. The
//! challenge endpoint instead consumes the short-lived cookie minted by the
//! password step and only issues a session once the code checks out.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{
    MessageResponse, TwoFactorDisableRequest, TwoFactorEnableRequest, TwoFactorEnableResponse,
    TwoFactorSignInRequest, TwoFactorVerifyRequest,
};
use super::utils::user_agent;
use super::{
    authenticated_response, build_cookie, clear_cookie, error_response, extract_client_ip,
    require_session,
};
use crate::gate::cookie_value;
use crate::provider::{generate_token, ClientMeta};

#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/enable",
    request_body = TwoFactorEnableRequest,
    responses(
        (status = 200, description = "Enrollment started", body = TwoFactorEnableResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Authentication required", body = String)
    ),
    tag = "two-factor"
)]
pub async fn enable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorEnableRequest>>,
) -> impl IntoResponse {
    let request: TwoFactorEnableRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    match auth_state
        .two_factor()
        .request_enable(session.user.id, &request.password)
        .await
    {
        Ok(enrollment) => {
            let body = TwoFactorEnableResponse {
                provisioning_uri: enrollment.provisioning_uri,
                backup_codes: enrollment.backup_codes,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(&err, "Two-factor enable failed").into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = MessageResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Wrong code or authentication required", body = String)
    ),
    tag = "two-factor"
)]
pub async fn verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorVerifyRequest>>,
) -> impl IntoResponse {
    let request: TwoFactorVerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    match auth_state
        .two_factor()
        .verify_enrollment(session.user.id, &request.code)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Two-factor enabled".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err, "Two-factor verification failed").into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/disable",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 200, description = "Two-factor disabled", body = MessageResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Authentication required", body = String)
    ),
    tag = "two-factor"
)]
pub async fn disable(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorDisableRequest>>,
) -> impl IntoResponse {
    let request: TwoFactorDisableRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    match auth_state
        .two_factor()
        .request_disable(session.user.id, &request.password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Two-factor disabled".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err, "Two-factor disable failed").into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/sign-in/two-factor",
    request_body = TwoFactorSignInRequest,
    responses(
        (status = 200, description = "Sign-in completed", body = super::types::SignInResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Wrong code or no pending sign-in", body = String),
        (status = 503, description = "Identity provider unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn sign_in_challenge(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorSignInRequest>>,
) -> impl IntoResponse {
    let request: TwoFactorSignInRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let config = auth_state.config();

    let Some(challenge) =
        cookie_value(&headers, config.challenge_cookie()).map(str::to_string)
    else {
        return (
            StatusCode::UNAUTHORIZED,
            "No pending sign-in".to_string(),
        )
            .into_response();
    };
    // The challenge stays parked until the code verifies, so a mistyped
    // code can be retried with the same cookie.
    let Some(user_id) = auth_state.challenges().peek(&challenge).await else {
        return (
            StatusCode::UNAUTHORIZED,
            "No pending sign-in".to_string(),
        )
            .into_response();
    };

    let device_token = if request.trust_device {
        match generate_token() {
            Ok(token) => Some(token),
            Err(err) => {
                error!("Failed to mint device token: {err}");
                None
            }
        }
    } else {
        None
    };

    if let Err(err) = auth_state
        .two_factor()
        .verify_login(user_id, &request.code, device_token.as_deref())
        .await
    {
        return error_response(&err, "Sign in failed").into_response();
    }

    if auth_state.challenges().complete(&challenge).await.is_none() {
        // Lost a race with another completion for the same challenge.
        return (
            StatusCode::UNAUTHORIZED,
            "No pending sign-in".to_string(),
        )
            .into_response();
    }

    let meta = ClientMeta {
        ip_address: extract_client_ip(&headers),
        user_agent: user_agent(&headers),
    };
    let session = match auth_state.provider().issue_session(user_id, &meta, None).await {
        Ok(session) => session,
        Err(err) => return error_response(&err, "Sign in failed").into_response(),
    };

    let (status, mut response_headers, body) = authenticated_response(config, &session);
    if let Ok(cookie) = clear_cookie(config.challenge_cookie(), config.session_cookie_secure()) {
        response_headers.append(SET_COOKIE, cookie);
    }
    if let Some(device_token) = device_token {
        if let Ok(cookie) = build_cookie(
            config.device_cookie(),
            &device_token,
            config.device_cookie_max_age_seconds(),
            config.session_cookie_secure(),
        ) {
            response_headers.append(SET_COOKIE, cookie);
        }
    }
    (status, response_headers, body).into_response()
}
