//! Identity provider seam.
//!
//! Everything the gateway knows about users, sessions, and second factors
//! goes through [`IdentityProvider`]. The gateway itself stores no identity
//! state; it orchestrates flows and talks to a provider. Two implementations
//! ship with the crate: an HTTP client for a real provider deployment and an
//! in-memory provider for development and tests.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AuthError, Result};

pub use self::http::HttpIdentityProvider;
pub use self::memory::MemoryIdentityProvider;

/// Role assigned to accounts that never had one set explicitly.
pub const DEFAULT_ROLE: &str = "user";

/// Identity attached to a validated session or credential check.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    /// Plain role string; `admin` unlocks admin-designated paths.
    pub role: String,
    pub two_factor_enabled: bool,
}

/// A session as the provider sees it. The raw token is included because the
/// lifecycle surface lists sessions and revokes them by token.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub token: String,
    pub user: UserRecord,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at_unix: i64,
    /// Absolute expiry; never extended by activity.
    pub expires_at_unix: i64,
    pub last_seen_at_unix: i64,
}

/// Client details recorded on the session at issue time.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Outcome of a password check.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CredentialCheck {
    pub user: UserRecord,
    /// `true` when a second factor must be verified before a session can be
    /// issued for this login. Already `false` for trusted devices.
    pub two_factor_required: bool,
}

/// Material handed to the user exactly once when enrollment starts.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Enrollment {
    /// `otpauth://` URI for the authenticator app.
    pub provisioning_uri: String,
    /// Plaintext backup codes; the provider keeps only hashes.
    pub backup_codes: Vec<String>,
}

/// Operations the gateway requires from an identity provider.
///
/// Credential and code failures surface as [`crate::error::AuthError`]
/// variants or `Ok(false)`, depending on the operation; transport and storage
/// faults must map to `DependencyUnavailable` so callers can tell an outage
/// apart from a rejection.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check email and password. Unknown accounts and wrong passwords both
    /// come back as `AuthError::Authentication`. `device_id` is the value of
    /// the trusted-device cookie, if the client presented one; a currently
    /// trusted device clears `two_factor_required` even for enrolled users.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
        device_id: Option<&str>,
    ) -> Result<CredentialCheck>;

    /// Resolve a session token. `Ok(None)` means expired, revoked, or never
    /// issued; callers get no way to tell which.
    async fn validate_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    /// Mint a session for a user whose factors have all been verified.
    /// `trusted_device` carries a device identifier to mark trusted as part
    /// of the same step.
    async fn issue_session(
        &self,
        user_id: Uuid,
        meta: &ClientMeta,
        trusted_device: Option<&str>,
    ) -> Result<SessionRecord>;

    /// Invalidate one session by token. Revoking an unknown token is not an
    /// error; the outcome (token unusable) already holds.
    async fn revoke_session(&self, token: &str) -> Result<()>;

    /// All live sessions for a user, most recently created first.
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Re-check the password and stage a fresh TOTP secret plus backup-code
    /// batch. Calling again before verification replaces both; the previous
    /// provisioning URI and codes stop working.
    async fn enroll_two_factor(&self, user_id: Uuid, password: &str) -> Result<Enrollment>;

    /// Confirm enrollment with a first TOTP code. `Ok(false)` is a wrong
    /// code; no enrollment in progress is a `Validation` error.
    async fn verify_two_factor_enrollment(&self, user_id: Uuid, code: &str) -> Result<bool>;

    /// Verify a TOTP or backup code during sign-in. Backup codes are
    /// consumed atomically; a code that verified once never verifies again.
    /// `trust_device` marks the given device identifier trusted on success.
    async fn verify_two_factor_login(
        &self,
        user_id: Uuid,
        code: &str,
        trust_device: Option<&str>,
    ) -> Result<bool>;

    /// Re-check the password and drop the TOTP secret and all backup codes.
    /// `Ok(false)` when two-factor was not enabled.
    async fn disable_two_factor(&self, user_id: Uuid, password: &str) -> Result<bool>;

    /// Cheap reachability probe for the health endpoint.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// 32 random bytes, URL-safe base64 without padding. Session, challenge, and
/// device tokens all come from here.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0_u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Internal(format!("entropy unavailable: {err}")))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// SHA-256 of a token. Stores and lookups key on the digest so a raw token
/// never has to sit in an index.
pub(crate) fn token_digest(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}
