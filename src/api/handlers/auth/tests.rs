//! Auth flow tests against the in-memory provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::Extension;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use std::sync::Arc;
use totp_rs::TOTP;
use uuid::Uuid;

use super::types::{
    RevokeSessionRequest, SignInRequest, TwoFactorDisableRequest, TwoFactorEnableRequest,
    TwoFactorSignInRequest, TwoFactorVerifyRequest,
};
use super::{sessions, two_factor, AuthConfig, AuthState};
use crate::error::{AuthError, Result as AuthResult};
use crate::provider::{
    ClientMeta, CredentialCheck, Enrollment, IdentityProvider, MemoryIdentityProvider,
    SessionRecord,
};

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "hunter2";

fn test_state() -> Result<(Arc<AuthState>, Arc<MemoryIdentityProvider>)> {
    let provider = Arc::new(MemoryIdentityProvider::new());
    provider.register_user(EMAIL, PASSWORD, "user")?;
    let config = AuthConfig::new("http://localhost:3000".to_string());
    let state = Arc::new(AuthState::new(
        config,
        Arc::clone(&provider) as Arc<dyn IdentityProvider>,
    ));
    Ok((state, provider))
}

fn cookie_headers(pairs: &[(&str, &str)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if !pairs.is_empty() {
        let value = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        headers.insert(COOKIE, HeaderValue::from_str(&value)?);
    }
    Ok(headers)
}

/// Value of a `Set-Cookie` response header for `name`, if one was set.
fn set_cookie(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            cookie
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.split(';').next())
                .map(str::to_string)
        })
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn sign_in_response(
    state: &Arc<AuthState>,
    headers: HeaderMap,
    email: &str,
    password: &str,
) -> Response {
    super::sign_in(
        headers,
        Extension(Arc::clone(state)),
        Some(Json(SignInRequest {
            email: email.to_string(),
            password: password.to_string(),
        })),
    )
    .await
    .into_response()
}

/// Enroll and confirm two-factor through the handlers, returning the
/// session cookie, the authenticator, and the backup codes.
async fn enable_two_factor(state: &Arc<AuthState>) -> Result<(String, TOTP, Vec<String>)> {
    let response = sign_in_response(state, HeaderMap::new(), EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    let session_cookie = set_cookie(&response, "pordisto_session").context("session cookie")?;
    let auth_headers = cookie_headers(&[("pordisto_session", &session_cookie)])?;

    let response = two_factor::enable(
        auth_headers.clone(),
        Extension(Arc::clone(state)),
        Some(Json(TwoFactorEnableRequest {
            password: PASSWORD.to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let uri = body
        .get("provisioning_uri")
        .and_then(Value::as_str)
        .context("missing provisioning_uri")?
        .to_string();
    let codes: Vec<String> = body
        .get("backup_codes")
        .and_then(Value::as_array)
        .context("missing backup_codes")?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    let totp = TOTP::from_url(&uri).context("provisioning uri did not parse")?;
    let response = two_factor::verify(
        auth_headers,
        Extension(Arc::clone(state)),
        Some(Json(TwoFactorVerifyRequest {
            code: totp.generate_current()?,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    Ok((session_cookie, totp, codes))
}

#[tokio::test]
async fn sign_in_rejects_missing_payload_and_bad_email() -> Result<()> {
    let (state, _) = test_state()?;

    let response = super::sign_in(HeaderMap::new(), Extension(Arc::clone(&state)), None)
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = sign_in_response(&state, HeaderMap::new(), "not-an-email", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn sign_in_wrong_password_is_unauthorized() -> Result<()> {
    let (state, _) = test_state()?;
    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response, "pordisto_session").is_none());
    Ok(())
}

#[tokio::test]
async fn sign_in_without_two_factor_issues_session_immediately() -> Result<()> {
    let (state, _) = test_state()?;
    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = set_cookie(&response, "pordisto_session").context("session cookie")?;
    assert!(!token.is_empty());

    let body = body_json(response).await?;
    assert_eq!(body.get("state"), Some(&Value::from("authenticated")));
    assert_eq!(
        body.pointer("/user/email").and_then(Value::as_str),
        Some(EMAIL)
    );

    // The authoritative session endpoint agrees.
    let headers = cookie_headers(&[("pordisto_session", &token)])?;
    let response = super::session(headers, Extension(state)).await.into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body.get("role"), Some(&Value::from("user")));
    Ok(())
}

#[tokio::test]
async fn sign_out_revokes_and_clears_cookie() -> Result<()> {
    let (state, provider) = test_state()?;
    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let token = set_cookie(&response, "pordisto_session").context("session cookie")?;

    let headers = cookie_headers(&[("pordisto_session", &token)])?;
    let response = super::sign_out(headers, Extension(Arc::clone(&state)))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    // Cleared, not re-issued.
    assert_eq!(set_cookie(&response, "pordisto_session"), Some(String::new()));
    assert!(provider.validate_session(&token).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn enrolled_user_walks_the_challenge_step() -> Result<()> {
    let (state, _) = test_state()?;
    let (_, totp, _) = enable_two_factor(&state).await?;

    // Password step parks the login; no session yet.
    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "pordisto_session").is_none());
    let challenge = set_cookie(&response, "pordisto_challenge").context("challenge cookie")?;
    let body = body_json(response).await?;
    assert_eq!(body.get("state"), Some(&Value::from("awaiting_two_factor")));

    // A wrong code leaves the challenge retryable.
    let headers = cookie_headers(&[("pordisto_challenge", &challenge)])?;
    let response = two_factor::sign_in_challenge(
        headers.clone(),
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorSignInRequest {
            code: "000000".to_string(),
            trust_device: false,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = two_factor::sign_in_challenge(
        headers.clone(),
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorSignInRequest {
            code: totp.generate_current()?,
            trust_device: false,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "pordisto_session").is_some());
    // Challenge cookie is cleared alongside.
    assert_eq!(
        set_cookie(&response, "pordisto_challenge"),
        Some(String::new())
    );
    let body = body_json(response).await?;
    assert_eq!(body.get("state"), Some(&Value::from("authenticated")));

    // The challenge was burned; replaying it is rejected.
    let response = two_factor::sign_in_challenge(
        headers,
        Extension(state),
        Some(Json(TwoFactorSignInRequest {
            code: totp.generate_current()?,
            trust_device: false,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn backup_code_completes_sign_in_once() -> Result<()> {
    let (state, _) = test_state()?;
    let (_, _, codes) = enable_two_factor(&state).await?;
    let code = codes.first().context("no backup codes")?.clone();

    for attempt in 0..2 {
        let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
        let challenge = set_cookie(&response, "pordisto_challenge").context("challenge cookie")?;
        let headers = cookie_headers(&[("pordisto_challenge", &challenge)])?;
        let response = two_factor::sign_in_challenge(
            headers,
            Extension(Arc::clone(&state)),
            Some(Json(TwoFactorSignInRequest {
                code: code.clone(),
                trust_device: false,
            })),
        )
        .await
        .into_response();
        if attempt == 0 {
            assert_eq!(response.status(), StatusCode::OK);
        } else {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
    Ok(())
}

#[tokio::test]
async fn trusted_device_skips_the_challenge() -> Result<()> {
    let (state, _) = test_state()?;
    let (_, totp, _) = enable_two_factor(&state).await?;

    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let challenge = set_cookie(&response, "pordisto_challenge").context("challenge cookie")?;
    let headers = cookie_headers(&[("pordisto_challenge", &challenge)])?;
    let response = two_factor::sign_in_challenge(
        headers,
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorSignInRequest {
            code: totp.generate_current()?,
            trust_device: true,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let device = set_cookie(&response, "pordisto_device").context("device cookie")?;

    // Next sign-in from the trusted device authenticates in one step.
    let headers = cookie_headers(&[("pordisto_device", &device)])?;
    let response = sign_in_response(&state, headers, EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "pordisto_session").is_some());
    let body = body_json(response).await?;
    assert_eq!(body.get("state"), Some(&Value::from("authenticated")));
    Ok(())
}

#[tokio::test]
async fn enable_requires_password_and_session() -> Result<()> {
    let (state, _) = test_state()?;

    // No session at all.
    let response = two_factor::enable(
        HeaderMap::new(),
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorEnableRequest {
            password: PASSWORD.to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let token = set_cookie(&response, "pordisto_session").context("session cookie")?;
    let headers = cookie_headers(&[("pordisto_session", &token)])?;

    // Wrong password re-check.
    let response = two_factor::enable(
        headers,
        Extension(state),
        Some(Json(TwoFactorEnableRequest {
            password: "wrong".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn reenrollment_rotates_backup_codes() -> Result<()> {
    let (state, _) = test_state()?;
    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let token = set_cookie(&response, "pordisto_session").context("session cookie")?;
    let headers = cookie_headers(&[("pordisto_session", &token)])?;

    let mut batches = Vec::new();
    for _ in 0..2 {
        let response = two_factor::enable(
            headers.clone(),
            Extension(Arc::clone(&state)),
            Some(Json(TwoFactorEnableRequest {
                password: PASSWORD.to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        batches.push(body_json(response).await?);
    }

    let first_codes = batches[0]
        .get("backup_codes")
        .and_then(Value::as_array)
        .context("first batch")?
        .clone();
    let second_uri = batches[1]
        .get("provisioning_uri")
        .and_then(Value::as_str)
        .context("second uri")?;
    assert_eq!(first_codes.len(), 10);

    // Confirm with the second secret; codes from the first batch are dead.
    let totp = TOTP::from_url(second_uri)?;
    let response = two_factor::verify(
        headers,
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorVerifyRequest {
            code: totp.generate_current()?,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let challenge = set_cookie(&response, "pordisto_challenge").context("challenge cookie")?;
    let stale = first_codes
        .first()
        .and_then(Value::as_str)
        .context("first code")?;
    let response = two_factor::sign_in_challenge(
        cookie_headers(&[("pordisto_challenge", &challenge)])?,
        Extension(state),
        Some(Json(TwoFactorSignInRequest {
            code: stale.to_string(),
            trust_device: false,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn disable_returns_sign_in_to_single_step() -> Result<()> {
    let (state, _) = test_state()?;
    let (session_cookie, _, _) = enable_two_factor(&state).await?;
    let headers = cookie_headers(&[("pordisto_session", &session_cookie)])?;

    let response = two_factor::disable(
        headers,
        Extension(Arc::clone(&state)),
        Some(Json(TwoFactorDisableRequest {
            password: PASSWORD.to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "pordisto_session").is_some());
    Ok(())
}

#[tokio::test]
async fn session_listing_marks_current_and_orders_recent_first() -> Result<()> {
    let (state, provider) = test_state()?;
    let first = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let first_token = set_cookie(&first, "pordisto_session").context("first session")?;
    let second = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    let second_token = set_cookie(&second, "pordisto_session").context("second session")?;

    let headers = cookie_headers(&[("pordisto_session", &second_token)])?;
    let response = sessions::list(headers.clone(), Extension(Arc::clone(&state)))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let listed = body
        .get("sessions")
        .and_then(Value::as_array)
        .context("sessions array")?;
    assert_eq!(listed.len(), 2);
    assert_eq!(
        listed[0].get("token").and_then(Value::as_str),
        Some(second_token.as_str())
    );
    assert_eq!(listed[0].get("current"), Some(&Value::from(true)));
    assert_eq!(listed[1].get("current"), Some(&Value::from(false)));

    // Revoking the caller's own session is refused.
    let response = sessions::revoke(
        headers.clone(),
        Extension(Arc::clone(&state)),
        Some(Json(RevokeSessionRequest {
            token: second_token.clone(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Revoking the other one works and kills the token for good.
    let response = sessions::revoke(
        headers.clone(),
        Extension(Arc::clone(&state)),
        Some(Json(RevokeSessionRequest {
            token: first_token.clone(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(provider.validate_session(&first_token).await?.is_none());

    let response = sessions::list(headers, Extension(state)).await.into_response();
    let body = body_json(response).await?;
    let listed = body
        .get("sessions")
        .and_then(Value::as_array)
        .context("sessions array")?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stale_cookie_clears_session_and_sets_recheck_marker() -> Result<()> {
    let (state, _) = test_state()?;
    let headers = cookie_headers(&[("pordisto_session", "not-a-live-token")])?;
    let response = super::session(headers, Extension(state)).await.into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(set_cookie(&response, "pordisto_session"), Some(String::new()));
    assert_eq!(
        set_cookie(&response, "pordisto_recheck"),
        Some("1".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn absent_cookie_sets_no_marker() -> Result<()> {
    let (state, _) = test_state()?;
    let response = super::session(HeaderMap::new(), Extension(state))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(set_cookie(&response, "pordisto_recheck").is_none());
    Ok(())
}

struct UnreachableProvider;

#[async_trait]
impl IdentityProvider for UnreachableProvider {
    async fn verify_credentials(
        &self,
        _email: &str,
        _password: &str,
        _device_id: Option<&str>,
    ) -> AuthResult<CredentialCheck> {
        Err(down())
    }

    async fn validate_session(&self, _token: &str) -> AuthResult<Option<SessionRecord>> {
        Err(down())
    }

    async fn issue_session(
        &self,
        _user_id: Uuid,
        _meta: &ClientMeta,
        _trusted_device: Option<&str>,
    ) -> AuthResult<SessionRecord> {
        Err(down())
    }

    async fn revoke_session(&self, _token: &str) -> AuthResult<()> {
        Err(down())
    }

    async fn list_sessions(&self, _user_id: Uuid) -> AuthResult<Vec<SessionRecord>> {
        Err(down())
    }

    async fn enroll_two_factor(&self, _user_id: Uuid, _password: &str) -> AuthResult<Enrollment> {
        Err(down())
    }

    async fn verify_two_factor_enrollment(&self, _user_id: Uuid, _code: &str) -> AuthResult<bool> {
        Err(down())
    }

    async fn verify_two_factor_login(
        &self,
        _user_id: Uuid,
        _code: &str,
        _trust_device: Option<&str>,
    ) -> AuthResult<bool> {
        Err(down())
    }

    async fn disable_two_factor(&self, _user_id: Uuid, _password: &str) -> AuthResult<bool> {
        Err(down())
    }
}

fn down() -> AuthError {
    AuthError::DependencyUnavailable("provider offline".to_string())
}

#[tokio::test]
async fn provider_outage_keeps_cookie_but_sets_marker() -> Result<()> {
    let config = AuthConfig::new("http://localhost:3000".to_string());
    let state = Arc::new(AuthState::new(config, Arc::new(UnreachableProvider)));

    let headers = cookie_headers(&[("pordisto_session", "some-token")])?;
    let response = super::session(headers, Extension(Arc::clone(&state)))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    // The token might still be good; only the marker is set.
    assert!(set_cookie(&response, "pordisto_session").is_none());
    assert_eq!(
        set_cookie(&response, "pordisto_recheck"),
        Some("1".to_string())
    );

    let response = sign_in_response(&state, HeaderMap::new(), EMAIL, PASSWORD).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
