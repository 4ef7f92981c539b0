//! # Pordisto (Authentication Gateway)
//!
//! `pordisto` sits between an edge proxy and an identity provider. It answers
//! forward-auth decision queries for the edge and runs the browser-facing
//! authentication flows: sign-in with an optional second factor, sign-out,
//! session introspection, and session management.
//!
//! ## Gate Model
//!
//! The edge proxy forwards each request's path and headers to the decision
//! endpoint. The gate rate-limits configured prefixes, classifies the path
//! (protected, admin-protected, auth-entry, public), and checks for the
//! session cookie - by presence only. Deep validation belongs to the session
//! endpoint; a recheck marker cookie bridges the two so a dead cookie cannot
//! bounce the browser between login and home forever.
//!
//! - **Optimistic gating:** the gate never calls the identity provider, so a
//!   provider outage does not take down every page behind the edge.
//! - **Fail-open limiting:** a counter-store outage degrades to no throttling
//!   instead of an outage of everything behind the gate.
//!
//! ## Two-Factor Authentication
//!
//! TOTP enrollment is a two-step confirmation: provisioning returns the
//! secret and one batch of backup codes exactly once, and only a verified
//! authenticator code arms the second factor. Sign-in then becomes a
//! challenge flow in which an authenticator code or an unused backup code
//! completes the pending login.
//!
//! All identity state lives behind the [`provider::IdentityProvider`] seam;
//! the gateway holds only short-lived challenge state.

pub mod api;
pub mod cli;
pub mod error;
pub mod gate;
pub mod provider;
pub mod two_factor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
