//! Auth state and configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::gate::{DEFAULT_RECHECK_COOKIE, DEFAULT_SESSION_COOKIE};
use crate::provider::{generate_token, IdentityProvider};
use crate::two_factor::TwoFactorService;

const DEFAULT_SESSION_COOKIE_MAX_AGE_SECONDS: i64 = 30 * 60;
const DEFAULT_DEVICE_COOKIE_MAX_AGE_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RECHECK_MAX_AGE_SECONDS: i64 = 30;
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_CHALLENGE_COOKIE: &str = "pordisto_challenge";
const DEFAULT_DEVICE_COOKIE: &str = "pordisto_device";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_cookie: String,
    challenge_cookie: String,
    device_cookie: String,
    recheck_cookie: String,
    session_cookie_max_age_seconds: i64,
    device_cookie_max_age_seconds: i64,
    recheck_max_age_seconds: i64,
    challenge_ttl_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            challenge_cookie: DEFAULT_CHALLENGE_COOKIE.to_string(),
            device_cookie: DEFAULT_DEVICE_COOKIE.to_string(),
            recheck_cookie: DEFAULT_RECHECK_COOKIE.to_string(),
            session_cookie_max_age_seconds: DEFAULT_SESSION_COOKIE_MAX_AGE_SECONDS,
            device_cookie_max_age_seconds: DEFAULT_DEVICE_COOKIE_MAX_AGE_SECONDS,
            recheck_max_age_seconds: DEFAULT_RECHECK_MAX_AGE_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
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
    pub fn with_session_cookie_max_age_seconds(mut self, seconds: i64) -> Self {
        self.session_cookie_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_device_cookie_max_age_seconds(mut self, seconds: i64) -> Self {
        self.device_cookie_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: u64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    pub(super) fn challenge_cookie(&self) -> &str {
        &self.challenge_cookie
    }

    pub(super) fn device_cookie(&self) -> &str {
        &self.device_cookie
    }

    pub(super) fn recheck_cookie(&self) -> &str {
        &self.recheck_cookie
    }

    pub(super) fn session_cookie_max_age_seconds(&self) -> i64 {
        self.session_cookie_max_age_seconds
    }

    pub(super) fn device_cookie_max_age_seconds(&self) -> i64 {
        self.device_cookie_max_age_seconds
    }

    pub(super) fn recheck_max_age_seconds(&self) -> i64 {
        self.recheck_max_age_seconds
    }

    pub(super) fn challenge_ttl_seconds(&self) -> u64 {
        self.challenge_ttl_seconds
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

struct PendingLogin {
    user_id: Uuid,
    created_at: Instant,
}

/// Sign-ins that passed the password step but still owe a second factor.
/// Keyed by the challenge token the client holds as a short-lived cookie.
pub struct ChallengeState {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl ChallengeState {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park a verified-password login and hand back its challenge token.
    pub(super) async fn store(&self, user_id: Uuid) -> Result<String> {
        let token = generate_token()?;
        let mut pending = self.pending.lock().await;
        pending.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        pending.insert(
            token.clone(),
            PendingLogin {
                user_id,
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Look up a challenge without consuming it. Used before code
    /// verification so a wrong code leaves the challenge retryable.
    pub(super) async fn peek(&self, token: &str) -> Option<Uuid> {
        let pending = self.pending.lock().await;
        pending
            .get(token)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.user_id)
    }

    /// Burn a challenge after its code verified.
    pub(super) async fn complete(&self, token: &str) -> Option<Uuid> {
        let mut pending = self.pending.lock().await;
        match pending.remove(token) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => Some(entry.user_id),
            _ => None,
        }
    }
}

pub struct AuthState {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    challenges: ChallengeState,
    two_factor: TwoFactorService,
}

impl AuthState {
    pub fn new(config: AuthConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let challenges = ChallengeState::new(Duration::from_secs(config.challenge_ttl_seconds()));
        Self {
            two_factor: TwoFactorService::new(Arc::clone(&provider)),
            challenges,
            config,
            provider,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    pub(super) fn challenges(&self) -> &ChallengeState {
        &self.challenges
    }

    pub(super) fn two_factor(&self) -> &TwoFactorService {
        &self.two_factor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::MemoryIdentityProvider;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://app.pordisto.dev".to_string());

        assert_eq!(config.frontend_base_url(), "https://app.pordisto.dev");
        assert_eq!(config.session_cookie(), "pordisto_session");
        assert_eq!(config.challenge_cookie(), "pordisto_challenge");
        assert_eq!(config.device_cookie(), "pordisto_device");
        assert_eq!(config.recheck_cookie(), "pordisto_recheck");
        assert_eq!(
            config.session_cookie_max_age_seconds(),
            DEFAULT_SESSION_COOKIE_MAX_AGE_SECONDS
        );
        assert_eq!(
            config.challenge_ttl_seconds(),
            DEFAULT_CHALLENGE_TTL_SECONDS
        );
        assert!(config.session_cookie_secure());

        let config = config
            .with_session_cookie("sid".to_string())
            .with_session_cookie_max_age_seconds(60)
            .with_device_cookie_max_age_seconds(120)
            .with_challenge_ttl_seconds(42);
        assert_eq!(config.session_cookie(), "sid");
        assert_eq!(config.session_cookie_max_age_seconds(), 60);
        assert_eq!(config.device_cookie_max_age_seconds(), 120);
        assert_eq!(config.challenge_ttl_seconds(), 42);
    }

    #[test]
    fn plain_http_frontend_disables_secure_flag() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        assert!(!config.session_cookie_secure());
    }

    #[tokio::test]
    async fn challenge_peek_then_complete() {
        let state = ChallengeState::new(Duration::from_secs(60));
        let user_id = Uuid::new_v4();
        let token = state.store(user_id).await.unwrap();

        assert_eq!(state.peek(&token).await, Some(user_id));
        // Peeking does not consume.
        assert_eq!(state.peek(&token).await, Some(user_id));
        assert_eq!(state.complete(&token).await, Some(user_id));
        assert_eq!(state.complete(&token).await, None);
    }

    #[tokio::test]
    async fn expired_challenge_is_gone() {
        let state = ChallengeState::new(Duration::from_secs(0));
        let token = state.store(Uuid::new_v4()).await.unwrap();
        assert_eq!(state.peek(&token).await, None);
        assert_eq!(state.complete(&token).await, None);
    }

    #[tokio::test]
    async fn auth_state_construction() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let state = AuthState::new(AuthConfig::new("http://localhost".to_string()), provider);
        assert_eq!(state.config().session_cookie(), "pordisto_session");
    }
}
