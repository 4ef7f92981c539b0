//! Backup code generation and verification helpers.
//!
//! Backup codes are the fallback factor when the authenticator app is
//! unavailable. Codes are shown to the user exactly once at enrollment and
//! stored only as SHA-256 digests; each code verifies at most once.

use constant_time_eq::constant_time_eq;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};

pub(crate) const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// 32 symbols, ambiguous glyphs removed. 32 divides 256 so indexing random
// bytes by modulo stays uniform.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated backup-code batch (plaintext + digests).
#[derive(Debug)]
pub struct BackupCodeBatch {
    /// Display-formatted codes, handed to the user once.
    pub codes: Vec<String>,
    /// SHA-256 digests of the normalized codes, in the same order.
    pub code_hashes: Vec<[u8; 32]>,
}

impl BackupCodeBatch {
    /// Generate a full batch of fresh codes.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let normalized = generate_code(&mut rng);
            code_hashes.push(digest(&normalized));
            codes.push(format_backup_code(&normalized));
        }
        Self { codes, code_hashes }
    }
}

/// Normalize user input for verification: strip separators, uppercase, and
/// enforce length and alphabet.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(AuthError::Validation(
            "invalid backup code length".to_string(),
        ));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(AuthError::Validation(
            "invalid backup code characters".to_string(),
        ));
    }
    Ok(normalized)
}

/// Hash a code for storage or lookup. Input goes through normalization so
/// `abcd-efgh-jklm` and `ABCDEFGHJKLM` digest identically.
pub fn hash_backup_code(code: &str) -> Result<[u8; 32]> {
    Ok(digest(&normalize_backup_code(code)?))
}

/// Compare a submitted code against a stored digest in constant time.
#[must_use]
pub fn verify_backup_code(code: &str, stored: &[u8; 32]) -> bool {
    hash_backup_code(code).is_ok_and(|candidate| constant_time_eq(&candidate, stored))
}

/// Group a normalized code for display (`ABCD-EFGH-JKLM`).
fn format_backup_code(normalized: &str) -> String {
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    raw.iter()
        .filter_map(|byte| {
            let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
            BACKUP_CODE_ALPHABET.get(idx).map(|&symbol| symbol as char)
        })
        .collect()
}

fn digest(normalized: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}
