//! In-memory identity provider.
//!
//! Backs development setups and tests. All state lives under one mutex so
//! multi-step changes (consume a backup code, flip enrollment state, record
//! device trust) happen atomically. Passwords and backup codes are stored as
//! digests; session and device tokens are stored raw only where the
//! lifecycle surface has to return them.

use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use super::{
    generate_token, token_digest, ClientMeta, CredentialCheck, Enrollment, IdentityProvider,
    SessionRecord, UserRecord, DEFAULT_ROLE,
};
use crate::error::{AuthError, Result};
use crate::two_factor::codes::{verify_backup_code, BackupCodeBatch};
use crate::two_factor::TwoFactorState;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_DEVICE_TRUST_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_ISSUER: &str = "Pordisto";

pub struct MemoryIdentityProvider {
    issuer: String,
    session_ttl_seconds: i64,
    device_trust_seconds: i64,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserEntry>,
    email_index: HashMap<String, Uuid>,
    sessions: HashMap<[u8; 32], SessionEntry>,
    /// user id -> device-token digest -> trust expiry (unix seconds).
    trusted_devices: HashMap<Uuid, HashMap<[u8; 32], i64>>,
}

struct UserEntry {
    id: Uuid,
    email: String,
    role: String,
    password_digest: [u8; 32],
    two_factor: TwoFactorEntry,
}

impl UserEntry {
    fn record(&self) -> UserRecord {
        UserRecord {
            id: self.id,
            email: self.email.clone(),
            role: self.role.clone(),
            two_factor_enabled: self.two_factor.state() == TwoFactorState::Enabled,
        }
    }

    fn password_matches(&self, password: &str) -> bool {
        constant_time_eq(&digest(password), &self.password_digest)
    }
}

/// Two-factor state with its data. The secret exists while pending or
/// enabled, never while disabled.
enum TwoFactorEntry {
    Disabled,
    Pending {
        secret: Vec<u8>,
        backup_hashes: Vec<[u8; 32]>,
    },
    Enabled {
        secret: Vec<u8>,
        backup_hashes: Vec<[u8; 32]>,
    },
}

impl TwoFactorEntry {
    const fn state(&self) -> TwoFactorState {
        match self {
            Self::Disabled => TwoFactorState::Disabled,
            Self::Pending { .. } => TwoFactorState::PendingVerification,
            Self::Enabled { .. } => TwoFactorState::Enabled,
        }
    }
}

struct SessionEntry {
    id: Uuid,
    token: String,
    user_id: Uuid,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at_unix: i64,
    expires_at_unix: i64,
    last_seen_at_unix: i64,
}

impl SessionEntry {
    fn record(&self, user: UserRecord) -> SessionRecord {
        SessionRecord {
            id: self.id,
            token: self.token.clone(),
            user,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            created_at_unix: self.created_at_unix,
            expires_at_unix: self.expires_at_unix,
            last_seen_at_unix: self.last_seen_at_unix,
        }
    }
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            device_trust_seconds: DEFAULT_DEVICE_TRUST_SECONDS,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, ttl: i64) -> Self {
        self.session_ttl_seconds = ttl;
        self
    }

    #[must_use]
    pub fn with_device_trust_seconds(mut self, ttl: i64) -> Self {
        self.device_trust_seconds = ttl;
        self
    }

    /// Create an account. Registration is not part of the gateway surface,
    /// so this exists only on the concrete type for seeding and tests.
    pub fn register_user(&self, email: &str, password: &str, role: &str) -> Result<UserRecord> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }
        let mut inner = self.lock()?;
        if inner.email_index.contains_key(&email) {
            return Err(AuthError::Validation(
                "email already registered".to_string(),
            ));
        }
        let entry = UserEntry {
            id: Uuid::new_v4(),
            email: email.clone(),
            role: if role.is_empty() {
                DEFAULT_ROLE.to_string()
            } else {
                role.to_string()
            },
            password_digest: digest(password),
            two_factor: TwoFactorEntry::Disabled,
        };
        let record = entry.record();
        inner.email_index.insert(email, entry.id);
        inner.users.insert(entry.id, entry);
        Ok(record)
    }

    /// Two-factor state for a user, for assertions and status surfaces.
    pub fn two_factor_state(&self, user_id: Uuid) -> Result<TwoFactorState> {
        let inner = self.lock()?;
        inner
            .users
            .get(&user_id)
            .map(|user| user.two_factor.state())
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AuthError::DependencyUnavailable("provider state poisoned".to_string()))
    }

    fn totp(&self, secret: &[u8], account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret.to_vec(),
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|err| AuthError::Internal(format!("totp init failed: {err}")))
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn digest(input: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

fn device_trusted(
    trusted: &HashMap<Uuid, HashMap<[u8; 32], i64>>,
    user_id: Uuid,
    device_id: Option<&str>,
    now: i64,
) -> bool {
    let Some(device_id) = device_id else {
        return false;
    };
    trusted
        .get(&user_id)
        .and_then(|devices| devices.get(&token_digest(device_id)))
        .is_some_and(|expires| *expires > now)
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
        device_id: Option<&str>,
    ) -> Result<CredentialCheck> {
        let inner = self.lock()?;
        let user = inner
            .email_index
            .get(&email.trim().to_lowercase())
            .and_then(|id| inner.users.get(id))
            .ok_or(AuthError::Authentication)?;
        if !user.password_matches(password) {
            return Err(AuthError::Authentication);
        }

        let enrolled = user.two_factor.state() == TwoFactorState::Enabled;
        let trusted = device_trusted(&inner.trusted_devices, user.id, device_id, now_unix());
        Ok(CredentialCheck {
            user: user.record(),
            two_factor_required: enrolled && !trusted,
        })
    }

    async fn validate_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let mut inner = self.lock()?;
        let now = now_unix();
        let key = token_digest(token);

        let Inner {
            sessions, users, ..
        } = &mut *inner;
        let Some(entry) = sessions.get_mut(&key) else {
            return Ok(None);
        };
        if entry.expires_at_unix <= now {
            sessions.remove(&key);
            return Ok(None);
        }
        // Activity moves last_seen but never the absolute expiry.
        entry.last_seen_at_unix = now;
        let Some(user) = users.get(&entry.user_id) else {
            sessions.remove(&key);
            return Ok(None);
        };
        Ok(Some(entry.record(user.record())))
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        meta: &ClientMeta,
        trusted_device: Option<&str>,
    ) -> Result<SessionRecord> {
        let token = generate_token()?;
        let mut inner = self.lock()?;
        let now = now_unix();

        let user = inner
            .users
            .get(&user_id)
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))?
            .record();

        if let Some(device_id) = trusted_device {
            let expires = now + self.device_trust_seconds;
            inner
                .trusted_devices
                .entry(user_id)
                .or_default()
                .insert(token_digest(device_id), expires);
        }

        // Opportunistic cleanup keeps the map from accumulating dead entries.
        inner.sessions.retain(|_, entry| entry.expires_at_unix > now);

        let entry = SessionEntry {
            id: Uuid::now_v7(),
            token: token.clone(),
            user_id,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            created_at_unix: now,
            expires_at_unix: now + self.session_ttl_seconds,
            last_seen_at_unix: now,
        };
        let record = entry.record(user);
        inner.sessions.insert(token_digest(&token), entry);
        Ok(record)
    }

    async fn revoke_session(&self, token: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.sessions.remove(&token_digest(token));
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        let inner = self.lock()?;
        let now = now_unix();
        let Some(user) = inner.users.get(&user_id) else {
            return Ok(Vec::new());
        };
        let user = user.record();

        let mut sessions: Vec<&SessionEntry> = inner
            .sessions
            .values()
            .filter(|entry| entry.user_id == user_id && entry.expires_at_unix > now)
            .collect();
        // Most recent first; UUIDv7 ids break created-at ties in order.
        sessions.sort_by(|a, b| {
            (b.created_at_unix, b.id).cmp(&(a.created_at_unix, a.id))
        });
        Ok(sessions
            .into_iter()
            .map(|entry| entry.record(user.clone()))
            .collect())
    }

    async fn enroll_two_factor(&self, user_id: Uuid, password: &str) -> Result<Enrollment> {
        let secret = Secret::generate_secret()
            .to_bytes()
            .map_err(|err| AuthError::Internal(format!("secret generation failed: {err}")))?;
        let batch = BackupCodeBatch::generate();

        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))?;
        if !user.password_matches(password) {
            return Err(AuthError::Authentication);
        }
        if user.two_factor.state() == TwoFactorState::Enabled {
            return Err(AuthError::Validation(
                "two-factor is already enabled".to_string(),
            ));
        }

        let uri = self.totp(&secret, &user.email)?.get_url();
        // Re-entry replaces any pending material; earlier provisioning URIs
        // and backup codes stop verifying.
        user.two_factor = TwoFactorEntry::Pending {
            secret,
            backup_hashes: batch.code_hashes,
        };
        Ok(Enrollment {
            provisioning_uri: uri,
            backup_codes: batch.codes,
        })
    }

    async fn verify_two_factor_enrollment(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))?;
        let TwoFactorEntry::Pending {
            secret,
            backup_hashes,
        } = &user.two_factor
        else {
            return Err(AuthError::Validation(
                "no enrollment in progress".to_string(),
            ));
        };

        let totp = self.totp(secret, &user.email)?;
        if !totp.check_current(code).unwrap_or(false) {
            return Ok(false);
        }
        user.two_factor = TwoFactorEntry::Enabled {
            secret: secret.clone(),
            backup_hashes: backup_hashes.clone(),
        };
        Ok(true)
    }

    async fn verify_two_factor_login(
        &self,
        user_id: Uuid,
        code: &str,
        trust_device: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let now = now_unix();

        let Inner {
            users,
            trusted_devices,
            ..
        } = &mut *inner;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))?;
        let TwoFactorEntry::Enabled {
            secret,
            backup_hashes,
        } = &mut user.two_factor
        else {
            return Err(AuthError::Validation(
                "two-factor is not enabled".to_string(),
            ));
        };

        let trimmed = code.trim();
        let accepted = if trimmed.len() == 6 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            TOTP::new(
                Algorithm::SHA1,
                6,
                1,
                30,
                secret.clone(),
                None,
                String::new(),
            )
            .map_err(|err| AuthError::Internal(format!("totp init failed: {err}")))?
            .check_current(trimmed)
            .unwrap_or(false)
        } else {
            // Backup codes burn on use; remove before reporting success so a
            // concurrent resubmission cannot spend the same code.
            match backup_hashes
                .iter()
                .position(|stored| verify_backup_code(trimmed, stored))
            {
                Some(idx) => {
                    backup_hashes.remove(idx);
                    true
                }
                None => false,
            }
        };

        if accepted {
            if let Some(device_id) = trust_device {
                trusted_devices
                    .entry(user_id)
                    .or_default()
                    .insert(token_digest(device_id), now + self.device_trust_seconds);
            }
        }
        Ok(accepted)
    }

    async fn disable_two_factor(&self, user_id: Uuid, password: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Validation("unknown user".to_string()))?;
        if !user.password_matches(password) {
            return Err(AuthError::Authentication);
        }
        match user.two_factor.state() {
            TwoFactorState::Disabled => Ok(false),
            // Disabling also cancels an unverified enrollment.
            TwoFactorState::PendingVerification | TwoFactorState::Enabled => {
                user.two_factor = TwoFactorEntry::Disabled;
                Ok(true)
            }
        }
    }
}
