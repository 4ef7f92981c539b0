//! Two-factor enrollment and verification flows.
//!
//! Flow overview:
//! 1) Enrollment starts with a password re-check and yields a provisioning
//!    URI plus one batch of backup codes, shown exactly once.
//! 2) A first authenticator code confirms enrollment; only then does
//!    sign-in start demanding a second factor.
//! 3) During sign-in, either an authenticator code or an unused backup code
//!    completes the challenge.
//! 4) Disabling requires the password again and drops the secret and all
//!    backup codes.
//!
//! State legality (disabled -> pending -> enabled, never disabled -> enabled
//! directly) is enforced by the identity provider, which owns the state; this
//! module validates submissions and maps provider outcomes onto the error
//! contract.

pub mod codes;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::provider::{Enrollment, IdentityProvider};

/// Where a user stands in the two-factor lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorState {
    Disabled,
    PendingVerification,
    Enabled,
}

impl TwoFactorState {
    #[must_use]
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::PendingVerification => "pending_verification",
            Self::Enabled => "enabled",
        }
    }

    #[must_use]
    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "disabled" => Some(Self::Disabled),
            "pending_verification" => Some(Self::PendingVerification),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }
}

/// Kind of second-factor submission, decided by shape alone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodeKind {
    /// Six decimal digits from the authenticator app.
    Totp,
    /// Twelve-symbol backup code, with or without separators.
    Backup,
}

/// Classify a submitted code by shape. Shapes are disjoint, so no guessing
/// order is involved: six digits is TOTP, twelve alphabet symbols is backup,
/// anything else is malformed.
pub fn classify_code(input: &str) -> Result<CodeKind> {
    let trimmed = input.trim();
    if trimmed.len() == 6 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return Ok(CodeKind::Totp);
    }
    if codes::normalize_backup_code(trimmed).is_ok() {
        return Ok(CodeKind::Backup);
    }
    Err(AuthError::Validation(
        "code must be a 6-digit authenticator code or a backup code".to_string(),
    ))
}

/// Orchestrates two-factor flows against the identity provider.
#[derive(Clone)]
pub struct TwoFactorService {
    provider: Arc<dyn IdentityProvider>,
}

impl TwoFactorService {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Begin enrollment after a password re-check. Repeating the call while
    /// pending stages fresh material and invalidates the previous batch.
    pub async fn request_enable(&self, user_id: Uuid, password: &str) -> Result<Enrollment> {
        if password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }
        self.provider.enroll_two_factor(user_id, password).await
    }

    /// Confirm enrollment with the first authenticator code.
    pub async fn verify_enrollment(&self, user_id: Uuid, code: &str) -> Result<()> {
        if classify_code(code)? != CodeKind::Totp {
            return Err(AuthError::Validation(
                "enrollment requires a 6-digit authenticator code".to_string(),
            ));
        }
        if self
            .provider
            .verify_two_factor_enrollment(user_id, code.trim())
            .await?
        {
            Ok(())
        } else {
            Err(AuthError::Authentication)
        }
    }

    /// Complete the second-factor step of sign-in with either code kind.
    pub async fn verify_login(
        &self,
        user_id: Uuid,
        code: &str,
        trust_device: Option<&str>,
    ) -> Result<()> {
        classify_code(code)?;
        if self
            .provider
            .verify_two_factor_login(user_id, code.trim(), trust_device)
            .await?
        {
            Ok(())
        } else {
            Err(AuthError::Authentication)
        }
    }

    /// Turn two-factor off after a password re-check.
    pub async fn request_disable(&self, user_id: Uuid, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }
        if self.provider.disable_two_factor(user_id, password).await? {
            Ok(())
        } else {
            Err(AuthError::Validation(
                "two-factor is not enabled".to_string(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::{ClientMeta, CredentialCheck, SessionRecord};
    use async_trait::async_trait;

    #[test]
    fn state_round_trips() {
        for state in [
            TwoFactorState::Disabled,
            TwoFactorState::PendingVerification,
            TwoFactorState::Enabled,
        ] {
            assert_eq!(TwoFactorState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TwoFactorState::from_str("nonsense"), None);
    }

    #[test]
    fn classify_code_by_shape() {
        assert_eq!(classify_code("123456").unwrap(), CodeKind::Totp);
        assert_eq!(classify_code(" 123456 ").unwrap(), CodeKind::Totp);
        assert_eq!(classify_code("ABCD-EFGH-JKLM").unwrap(), CodeKind::Backup);
        assert_eq!(classify_code("abcdefghjklm").unwrap(), CodeKind::Backup);
        assert!(classify_code("12345").is_err());
        assert!(classify_code("hello").is_err());
    }

    /// Provider stub with scripted outcomes for code verification.
    struct StubProvider {
        enrollment_ok: bool,
        login_ok: bool,
        enabled: bool,
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn verify_credentials(
            &self,
            _email: &str,
            _password: &str,
            _device_id: Option<&str>,
        ) -> Result<CredentialCheck> {
            Err(AuthError::Authentication)
        }

        async fn validate_session(&self, _token: &str) -> Result<Option<SessionRecord>> {
            Ok(None)
        }

        async fn issue_session(
            &self,
            _user_id: Uuid,
            _meta: &ClientMeta,
            _trusted_device: Option<&str>,
        ) -> Result<SessionRecord> {
            Err(AuthError::Authentication)
        }

        async fn revoke_session(&self, _token: &str) -> Result<()> {
            Ok(())
        }

        async fn list_sessions(&self, _user_id: Uuid) -> Result<Vec<SessionRecord>> {
            Ok(Vec::new())
        }

        async fn enroll_two_factor(&self, _user_id: Uuid, _password: &str) -> Result<Enrollment> {
            Ok(Enrollment {
                provisioning_uri: "otpauth://totp/test".to_string(),
                backup_codes: Vec::new(),
            })
        }

        async fn verify_two_factor_enrollment(&self, _user_id: Uuid, _code: &str) -> Result<bool> {
            Ok(self.enrollment_ok)
        }

        async fn verify_two_factor_login(
            &self,
            _user_id: Uuid,
            _code: &str,
            _trust_device: Option<&str>,
        ) -> Result<bool> {
            Ok(self.login_ok)
        }

        async fn disable_two_factor(&self, _user_id: Uuid, _password: &str) -> Result<bool> {
            Ok(self.enabled)
        }
    }

    fn service(stub: StubProvider) -> TwoFactorService {
        TwoFactorService::new(Arc::new(stub))
    }

    #[tokio::test]
    async fn enrollment_rejects_backup_shaped_codes() {
        let service = service(StubProvider {
            enrollment_ok: true,
            login_ok: true,
            enabled: true,
        });
        let err = service
            .verify_enrollment(Uuid::new_v4(), "ABCD-EFGH-JKLM")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_enrollment_code_is_authentication_error() {
        let service = service(StubProvider {
            enrollment_ok: false,
            login_ok: true,
            enabled: true,
        });
        let err = service
            .verify_enrollment(Uuid::new_v4(), "123456")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Authentication);
    }

    #[tokio::test]
    async fn login_accepts_both_code_kinds() {
        let service = service(StubProvider {
            enrollment_ok: true,
            login_ok: true,
            enabled: true,
        });
        service
            .verify_login(Uuid::new_v4(), "123456", None)
            .await
            .unwrap();
        service
            .verify_login(Uuid::new_v4(), "ABCD-EFGH-JKLM", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disable_when_not_enabled_is_validation_error() {
        let service = service(StubProvider {
            enrollment_ok: true,
            login_ok: true,
            enabled: false,
        });
        let err = service
            .request_disable(Uuid::new_v4(), "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_password_rejected_before_provider() {
        let service = service(StubProvider {
            enrollment_ok: true,
            login_ok: true,
            enabled: true,
        });
        assert!(service
            .request_enable(Uuid::new_v4(), "")
            .await
            .is_err());
        assert!(service.request_disable(Uuid::new_v4(), "").await.is_err());
    }
}
