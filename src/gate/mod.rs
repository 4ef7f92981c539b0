//! Request gating: rate limiting, route classification, and redirect policy.
//!
//! [`Gate::decide`] is the single entry point. The checks run in a fixed
//! order: rate limit first (throttling applies to public paths too), then
//! route class, then cookie presence. Admin role enforcement is deferred to
//! the session endpoint; the gate only annotates the verdict because the role
//! is not knowable from the cookie alone.

pub mod cookie;
pub mod limiter;
pub mod memory;
pub mod redis;
pub mod routes;

use axum::http::HeaderMap;
use url::form_urlencoded;

pub use self::cookie::{cookie_value, has_session_cookie};
pub use self::limiter::{CounterStore, RateLimitInfo, RateLimiter};
pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;
pub use self::routes::{RouteClass, RouteTable};

pub(crate) const DEFAULT_SESSION_COOKIE: &str = "pordisto_session";
pub(crate) const DEFAULT_RECHECK_COOKIE: &str = "pordisto_recheck";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_HOME_PATH: &str = "/dashboard";
const DEFAULT_CALLBACK_PARAM: &str = "callback";

/// Role name attached to allow verdicts for admin-designated paths.
pub const ADMIN_ROLE: &str = "admin";

/// Bucket used when no client address could be derived from the request.
const UNKNOWN_CLIENT_KEY: &str = "unknown";

/// Static gate policy: cookie names, redirect targets, and the path prefixes
/// subject to rate limiting.
#[derive(Clone, Debug)]
pub struct GateConfig {
    session_cookie: String,
    recheck_cookie: String,
    login_path: String,
    home_path: String,
    callback_param: String,
    limited_prefixes: Vec<String>,
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            recheck_cookie: DEFAULT_RECHECK_COOKIE.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
            callback_param: DEFAULT_CALLBACK_PARAM.to_string(),
            limited_prefixes: vec!["/v1/auth".to_string()],
        }
    }

    #[must_use]
    pub fn with_session_cookie(mut self, name: String) -> Self {
        self.session_cookie = name;
        self
    }

    #[must_use]
    pub fn with_recheck_cookie(mut self, name: String) -> Self {
        self.recheck_cookie = name;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, path: String) -> Self {
        self.home_path = path;
        self
    }

    #[must_use]
    pub fn with_callback_param(mut self, param: String) -> Self {
        self.callback_param = param;
        self
    }

    #[must_use]
    pub fn with_limited_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.limited_prefixes = prefixes;
        self
    }

    #[must_use]
    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    pub(crate) fn recheck_cookie(&self) -> &str {
        &self.recheck_cookie
    }

    pub(crate) fn login_path(&self) -> &str {
        &self.login_path
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The slice of an incoming request the gate looks at.
#[derive(Debug)]
pub struct GateRequest<'a> {
    /// Request path without query string.
    pub path: &'a str,
    /// Client address derived from forwarding headers, if any.
    pub client_ip: Option<&'a str>,
    /// Original request headers, used only for cookie reads.
    pub headers: &'a HeaderMap,
}

/// Verdict for one request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GateDecision {
    /// Let the request through. `required_role` is set for admin paths so the
    /// downstream role check knows what to enforce after deep validation.
    Allow { required_role: Option<&'static str> },
    /// Send the client elsewhere (login with callback, or home).
    Redirect { location: String },
    /// Too many hits in the window; the info carries the response headers.
    Throttle { info: RateLimitInfo },
}

/// Gating engine combining policy, route table, and limiter.
pub struct Gate {
    config: GateConfig,
    routes: RouteTable,
    limiter: RateLimiter,
}

impl Gate {
    #[must_use]
    pub fn new(config: GateConfig, routes: RouteTable, limiter: RateLimiter) -> Self {
        Self {
            config,
            routes,
            limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide what happens to a request. The only I/O is the limiter's
    /// counter-store round trip; everything after that is pure policy.
    pub async fn decide(&self, request: &GateRequest<'_>) -> GateDecision {
        if RouteTable::covered_by(&self.config.limited_prefixes, request.path) {
            let key = request.client_ip.unwrap_or(UNKNOWN_CLIENT_KEY);
            let info = self.limiter.limit(key).await;
            if !info.allowed {
                return GateDecision::Throttle { info };
            }
        }

        let class = self.routes.classify(request.path);
        let session_present = has_session_cookie(request.headers, &self.config.session_cookie);

        match class {
            RouteClass::Protected | RouteClass::AdminProtected => {
                if session_present {
                    GateDecision::Allow {
                        required_role: (class == RouteClass::AdminProtected).then_some(ADMIN_ROLE),
                    }
                } else {
                    GateDecision::Redirect {
                        location: self.login_redirect(request.path),
                    }
                }
            }
            RouteClass::AuthEntry => {
                // A fresh recheck marker means the cookie just failed deep
                // validation; honoring the cookie here would bounce the
                // client between login and home forever.
                let recheck = cookie::cookie_value(request.headers, &self.config.recheck_cookie)
                    .is_some_and(|value| !value.is_empty());
                if session_present && !recheck {
                    GateDecision::Redirect {
                        location: self.config.home_path.clone(),
                    }
                } else {
                    GateDecision::Allow {
                        required_role: None,
                    }
                }
            }
            RouteClass::Public => GateDecision::Allow {
                required_role: None,
            },
        }
    }

    /// Login URL carrying the original path so the client can resume after
    /// authenticating.
    fn login_redirect(&self, original_path: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(&self.config.callback_param, original_path)
            .finish();
        format!("{}?{query}", self.config.login_path)
    }
}
