//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Where a sign-in stands. The client threads this itself; the service
/// keeps no ambient flow flag.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignInState {
    AwaitingCredentials,
    AwaitingTwoFactor,
    Authenticated,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInResponse {
    pub state: SignInState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorSignInRequest {
    pub code: String,
    #[serde(default)]
    pub trust_device: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct UserSummary {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub two_factor_enabled: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub two_factor_enabled: bool,
    pub expires_at_unix: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorEnableRequest {
    pub password: String,
}

/// Returned exactly once; neither the URI nor the codes can be fetched
/// again later.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorEnableResponse {
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorDisableRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionView {
    pub token: String,
    pub created_at_unix: i64,
    pub last_seen_at_unix: i64,
    pub expires_at_unix: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// The session performing the request.
    pub current: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeSessionRequest {
    pub token: String,
}
