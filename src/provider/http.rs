//! HTTP identity provider client.
//!
//! Talks to a remote identity service over JSON. Transport faults and 5xx
//! answers surface as `DependencyUnavailable`; 4xx answers map onto the
//! gateway error taxonomy so handlers treat remote and in-memory providers
//! the same way.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info_span, Instrument};
use url::Url;
use uuid::Uuid;

use super::{ClientMeta, CredentialCheck, Enrollment, IdentityProvider, SessionRecord};
use crate::error::{AuthError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

pub struct HttpIdentityProvider {
    origin: String,
    token: Option<SecretString>,
    client: Client,
}

#[derive(serde::Deserialize)]
struct VerifiedResponse {
    verified: bool,
}

#[derive(serde::Deserialize)]
struct DisabledResponse {
    disabled: bool,
}

impl HttpIdentityProvider {
    /// Build a client for the provider at `base_url`. The URL is reduced to
    /// its origin here; a bad URL fails construction, not the first request.
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self> {
        let origin = origin(base_url)?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| AuthError::Internal(format!("http client build failed: {err}")))?;
        Ok(Self {
            origin,
            token,
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> (RequestBuilder, String) {
        let url = format!("{}{path}", self.origin);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        (builder, url)
    }

    async fn send(&self, builder: RequestBuilder, name: &'static str, url: &str) -> Result<Response> {
        let span = info_span!("provider.request", operation = name, url = %url);
        builder
            .send()
            .instrument(span)
            .await
            .map_err(|err| AuthError::DependencyUnavailable(format!("identity provider unreachable: {err}")))
    }
}

/// Reduce a configured URL to `scheme://host:port`.
fn origin(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url)
        .map_err(|err| AuthError::Validation(format!("invalid provider url: {err}")))?;
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| AuthError::Validation("provider url has no host".to_string()))?;
    let port = match url.port() {
        Some(port) => port,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => {
                return Err(AuthError::Validation(format!(
                    "unsupported provider url scheme {scheme}"
                )))
            }
        },
    };
    Ok(format!("{scheme}://{host}:{port}"))
}

fn classify_status(status: StatusCode, message: String, retry_after: Option<u64>) -> AuthError {
    match status {
        StatusCode::UNAUTHORIZED => AuthError::Authentication,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            AuthError::Validation(if message.is_empty() {
                "provider rejected the request".to_string()
            } else {
                message
            })
        }
        StatusCode::FORBIDDEN => AuthError::Forbidden("provider denied the request"),
        StatusCode::TOO_MANY_REQUESTS => AuthError::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(1)),
        },
        status if status.is_server_error() => {
            AuthError::DependencyUnavailable(format!("identity provider returned {status}"))
        }
        status => AuthError::Internal(format!("unexpected provider status {status}")),
    }
}

async fn error_for(response: Response) -> AuthError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    classify_status(status, message, retry_after)
}

async fn into_result<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_for(response).await);
    }
    response.json().await.map_err(|err| {
        AuthError::DependencyUnavailable(format!("invalid provider response: {err}"))
    })
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
        device_id: Option<&str>,
    ) -> Result<CredentialCheck> {
        let (builder, url) = self.request(Method::POST, "/v1/credentials/verify");
        let payload = json!({
            "email": email,
            "password": password,
            "device_id": device_id,
        });
        let response = self
            .send(builder.json(&payload), "credentials.verify", &url)
            .await?;
        into_result(response).await
    }

    async fn validate_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let (builder, url) = self.request(Method::POST, "/v1/sessions/validate");
        let response = self
            .send(builder.json(&json!({ "token": token })), "sessions.validate", &url)
            .await?;
        // A dead token is a plain "no session", not an error.
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED
        ) {
            return Ok(None);
        }
        into_result(response).await.map(Some)
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        meta: &ClientMeta,
        trusted_device: Option<&str>,
    ) -> Result<SessionRecord> {
        let (builder, url) = self.request(Method::POST, "/v1/sessions");
        let payload = json!({
            "user_id": user_id,
            "ip_address": meta.ip_address,
            "user_agent": meta.user_agent,
            "trusted_device": trusted_device,
        });
        let response = self.send(builder.json(&payload), "sessions.issue", &url).await?;
        into_result(response).await
    }

    async fn revoke_session(&self, token: &str) -> Result<()> {
        let (builder, url) = self.request(Method::POST, "/v1/sessions/revoke");
        let response = self
            .send(builder.json(&json!({ "token": token })), "sessions.revoke", &url)
            .await?;
        // Unknown tokens are already revoked as far as the caller cares.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(error_for(response).await)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        let path = format!("/v1/users/{user_id}/sessions");
        let (builder, url) = self.request(Method::GET, &path);
        let response = self.send(builder, "sessions.list", &url).await?;
        into_result(response).await
    }

    async fn enroll_two_factor(&self, user_id: Uuid, password: &str) -> Result<Enrollment> {
        let path = format!("/v1/users/{user_id}/two-factor");
        let (builder, url) = self.request(Method::POST, &path);
        let response = self
            .send(builder.json(&json!({ "password": password })), "two_factor.enroll", &url)
            .await?;
        into_result(response).await
    }

    async fn verify_two_factor_enrollment(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let path = format!("/v1/users/{user_id}/two-factor/verify");
        let (builder, url) = self.request(Method::POST, &path);
        let response = self
            .send(builder.json(&json!({ "code": code })), "two_factor.verify", &url)
            .await?;
        into_result::<VerifiedResponse>(response)
            .await
            .map(|body| body.verified)
    }

    async fn verify_two_factor_login(
        &self,
        user_id: Uuid,
        code: &str,
        trust_device: Option<&str>,
    ) -> Result<bool> {
        let path = format!("/v1/users/{user_id}/two-factor/challenge");
        let (builder, url) = self.request(Method::POST, &path);
        let payload = json!({
            "code": code,
            "trust_device": trust_device,
        });
        let response = self
            .send(builder.json(&payload), "two_factor.challenge", &url)
            .await?;
        into_result::<VerifiedResponse>(response)
            .await
            .map(|body| body.verified)
    }

    async fn disable_two_factor(&self, user_id: Uuid, password: &str) -> Result<bool> {
        let path = format!("/v1/users/{user_id}/two-factor/disable");
        let (builder, url) = self.request(Method::POST, &path);
        let response = self
            .send(builder.json(&json!({ "password": password })), "two_factor.disable", &url)
            .await?;
        into_result::<DisabledResponse>(response)
            .await
            .map(|body| body.disabled)
    }

    async fn probe(&self) -> Result<()> {
        let (builder, url) = self.request(Method::GET, "/health");
        let response = self.send(builder, "health", &url).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::DependencyUnavailable(format!(
                "identity provider health returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn origin_fills_in_default_ports() {
        assert_eq!(
            origin("https://id.example.com").unwrap(),
            "https://id.example.com:443"
        );
        assert_eq!(
            origin("http://localhost:9000/ignored/path").unwrap(),
            "http://localhost:9000"
        );
    }

    #[test]
    fn origin_rejects_schemes_without_a_port_rule() {
        assert!(origin("ftp://id.example.com").is_err());
        assert!(origin("not a url").is_err());
    }

    #[test]
    fn statuses_map_onto_the_error_taxonomy() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, String::new(), None),
            AuthError::Authentication
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "bad email".to_string(), None),
            AuthError::Validation("bad email".to_string())
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, String::new(), None),
            AuthError::Forbidden("provider denied the request")
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new(), Some(7)),
            AuthError::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new(), None),
            AuthError::DependencyUnavailable(_)
        ));
    }

    #[test]
    fn empty_validation_message_gets_a_fallback() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, String::new(), None);
        assert_eq!(
            err,
            AuthError::Validation("provider rejected the request".to_string())
        );
    }
}
