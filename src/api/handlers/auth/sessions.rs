//! Session lifecycle endpoints: list active sessions, revoke one.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::state::AuthState;
use super::types::{RevokeSessionRequest, SessionListResponse, SessionView};
use super::{error_response, require_session};
use crate::error::AuthError;

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent first", body = SessionListResponse),
        (status = 401, description = "Authentication required", body = String),
        (status = 503, description = "Identity provider unavailable", body = String)
    ),
    tag = "sessions"
)]
pub async fn list(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    match auth_state.provider().list_sessions(session.user.id).await {
        Ok(records) => {
            let sessions = records
                .into_iter()
                .map(|record| SessionView {
                    current: record.token == session.token,
                    token: record.token,
                    created_at_unix: record.created_at_unix,
                    last_seen_at_unix: record.last_seen_at_unix,
                    expires_at_unix: record.expires_at_unix,
                    ip_address: record.ip_address,
                    user_agent: record.user_agent,
                })
                .collect();
            (StatusCode::OK, Json(SessionListResponse { sessions })).into_response()
        }
        Err(err) => error_response(&err, "Session listing failed").into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/revoke",
    request_body = RevokeSessionRequest,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Authentication required", body = String),
        (status = 403, description = "Cannot revoke the current session", body = String)
    ),
    tag = "sessions"
)]
pub async fn revoke(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RevokeSessionRequest>>,
) -> impl IntoResponse {
    let request: RevokeSessionRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    if request.token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }
    let session = match require_session(&headers, &auth_state).await {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    // Self-revocation goes through sign-out so the request performing the
    // revocation is not invalidated midway.
    if request.token == session.token {
        let err = AuthError::Forbidden("use sign-out to end the current session");
        return error_response(&err, "Session revocation failed").into_response();
    }

    match auth_state.provider().revoke_session(&request.token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err, "Session revocation failed").into_response(),
    }
}
