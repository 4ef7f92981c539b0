//! Forward-auth decision endpoint consumed by the edge proxy.
//!
//! The edge forwards each request's path and headers here and acts on the
//! verdict: 204 passes the request through, 307 carries the redirect
//! target, 429 throttles with standard rate-limit headers. Redirect and
//! throttle responses also carry a JSON body for programmatic edges.

use axum::{
    extract::Extension,
    http::{
        header::{LOCATION, RETRY_AFTER},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::auth::extract_client_ip;
use crate::gate::limiter::now_unix_ms;
use crate::gate::{Gate, GateDecision, GateRequest, RateLimitInfo};

const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";
const REQUIRED_ROLE_HEADER: &str = "x-gate-required-role";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DecisionResponse {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/v1/gate/decision",
    params(
        ("X-Forwarded-Uri" = String, Header, description = "Original request URI"),
        ("X-Forwarded-For" = Option<String>, Header, description = "Client address chain")
    ),
    responses(
        (status = 204, description = "Request may proceed"),
        (status = 307, description = "Redirect to the given Location", body = DecisionResponse),
        (status = 400, description = "Missing forwarded URI", body = String),
        (status = 429, description = "Rate limited", body = DecisionResponse)
    ),
    tag = "gate"
)]
pub async fn decision(headers: HeaderMap, gate: Extension<Arc<Gate>>) -> impl IntoResponse {
    let Some(path) = forwarded_path(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            "Missing X-Forwarded-Uri header".to_string(),
        )
            .into_response();
    };

    let client_ip = extract_client_ip(&headers);
    let request = GateRequest {
        path: &path,
        client_ip: client_ip.as_deref(),
        headers: &headers,
    };

    match gate.decide(&request).await {
        GateDecision::Allow { required_role } => {
            let mut response_headers = HeaderMap::new();
            if let Some(role) = required_role {
                if let Ok(value) = HeaderValue::from_str(role) {
                    response_headers.insert(REQUIRED_ROLE_HEADER, value);
                }
            }
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
        GateDecision::Redirect { location } => {
            let mut response_headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&location) {
                response_headers.insert(LOCATION, value);
            }
            let body = DecisionResponse {
                action: "redirect".to_string(),
                location: Some(location),
                retry_after_seconds: None,
            };
            (StatusCode::TEMPORARY_REDIRECT, response_headers, Json(body)).into_response()
        }
        GateDecision::Throttle { info } => {
            let retry_after = info.retry_after_seconds(now_unix_ms().div_ceil(1000));
            let body = DecisionResponse {
                action: "throttle".to_string(),
                location: None,
                retry_after_seconds: Some(retry_after),
            };
            (
                StatusCode::TOO_MANY_REQUESTS,
                rate_limit_headers(&info, retry_after),
                Json(body),
            )
                .into_response()
        }
    }
}

/// Forwarded URI reduced to its path; classification and callbacks ignore
/// the query string.
fn forwarded_path(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_URI_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|uri| uri.split('?').next().unwrap_or(uri))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

fn rate_limit_headers(info: &RateLimitInfo, retry_after: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        (RETRY_AFTER.as_str(), retry_after.to_string()),
        ("x-ratelimit-limit", info.limit.to_string()),
        ("x-ratelimit-remaining", info.remaining.to_string()),
        ("x-ratelimit-reset", info.reset_at.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gate::{GateConfig, MemoryCounterStore, RateLimiter, RouteTable};
    use axum::http::header::COOKIE;
    use std::time::Duration;

    fn test_gate(capacity: u32) -> Arc<Gate> {
        let routes = RouteTable::new(
            vec!["/dashboard".to_string(), "/admin".to_string()],
            vec!["/login".to_string()],
            vec!["/admin".to_string()],
        );
        let limiter = RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            capacity,
            Duration::from_secs(10),
        );
        Arc::new(Gate::new(GateConfig::new(), routes, limiter))
    }

    fn forwarded(uri: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_URI_HEADER,
            HeaderValue::from_str(uri).unwrap(),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers
    }

    #[tokio::test]
    async fn missing_forwarded_uri_is_bad_request() {
        let response = decision(HeaderMap::new(), Extension(test_gate(10)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn public_path_allows_with_no_role_header() {
        let response = decision(forwarded("/pricing"), Extension(test_gate(10)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(REQUIRED_ROLE_HEADER).is_none());
    }

    #[tokio::test]
    async fn protected_path_redirects_with_callback() {
        let response = decision(forwarded("/dashboard/settings?tab=keys"), Extension(test_gate(10)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "/login?callback=%2Fdashboard%2Fsettings");
    }

    #[tokio::test]
    async fn admin_path_with_cookie_carries_role_header() {
        let gate = test_gate(10);
        let mut headers = forwarded("/admin/users");
        headers.insert(
            COOKIE,
            HeaderValue::from_static("pordisto_session=sometoken"),
        );
        let response = decision(headers, Extension(gate)).await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(REQUIRED_ROLE_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("admin")
        );
    }

    #[tokio::test]
    async fn over_capacity_throttles_with_headers() {
        let gate = test_gate(1);
        let first = decision(forwarded("/v1/auth/sign-in"), Extension(Arc::clone(&gate)))
            .await
            .into_response();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);

        let second = decision(forwarded("/v1/auth/sign-in"), Extension(gate))
            .await
            .into_response();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = second.headers();
        assert_eq!(
            headers.get("x-ratelimit-limit").and_then(|v| v.to_str().ok()),
            Some("1")
        );
        assert_eq!(
            headers
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok()),
            Some("0")
        );
        assert!(headers.get(RETRY_AFTER).is_some());
        assert!(headers.get("x-ratelimit-reset").is_some());
    }
}
