//! One-way credential hashing with tagged-format verification.
//!
//! New hashes are always Argon2id in PHC string format, so the stored value
//! self-describes its algorithm parameters and carries a per-call random
//! salt. Earlier revisions of the system stored salted SHA-256 digests;
//! `verify` still accepts those under the `$sha256$` tag, but `hash` never
//! produces them and no further legacy formats will be added.
//!
//! Security boundaries: `verify` fails closed and returns a bare `bool`,
//! never an error that would let a caller distinguish a malformed hash from
//! a wrong password. Comparisons are constant-time in the mismatch position.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Format tag for legacy salted-digest hashes.
const LEGACY_TAG: &str = "$sha256$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("credential must not be empty")]
    EmptyInput,
    #[error("failed to hash credential")]
    Backend,
}

/// Argon2id cost parameters. Defaults follow the current OWASP minimum
/// (19 MiB memory, 2 iterations, 1 lane).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherParams {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for HasherParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl HasherParams {
    fn argon2(self) -> Result<Argon2<'static>, HashError> {
        Params::new(self.memory_kib, self.time_cost, self.parallelism, None)
            .map(|params| Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
            .map_err(|_| HashError::Backend)
    }
}

/// Hash a plaintext credential with a fresh random salt.
///
/// Hashing the same plaintext twice yields different outputs; both verify.
///
/// # Errors
/// Returns `HashError::EmptyInput` for an empty plaintext and
/// `HashError::Backend` if the hash backend rejects the parameters.
pub fn hash(plaintext: &str, params: &HasherParams) -> Result<String, HashError> {
    if plaintext.is_empty() {
        return Err(HashError::EmptyInput);
    }
    let salt = SaltString::generate(&mut OsRng);
    params
        .argon2()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| HashError::Backend)
}

/// Verify a plaintext against a stored hash, dispatching on the format tag.
///
/// Fails closed: malformed hashes, unknown tags, and backend errors all
/// return `false`. Argon2 parameters are read from the stored PHC string, so
/// hashes produced under older cost settings keep verifying.
#[must_use]
pub fn verify(plaintext: &str, stored: &str) -> bool {
    if plaintext.is_empty() || stored.is_empty() {
        return false;
    }
    if let Some(rest) = stored.strip_prefix(LEGACY_TAG) {
        return verify_legacy(plaintext, rest);
    }
    PasswordHash::new(stored)
        .ok()
        .as_ref()
        .map(|hash| {
            Argon2::default()
                .verify_password(plaintext.as_bytes(), hash)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Legacy format: `$sha256$<salt-b64>$<digest-b64>`, digest over salt || plaintext.
fn verify_legacy(plaintext: &str, rest: &str) -> bool {
    let Some((salt_b64, digest_b64)) = rest.split_once('$') else {
        return false;
    };
    let Ok(salt) = STANDARD_NO_PAD.decode(salt_b64) else {
        return false;
    };
    let Ok(expected) = STANDARD_NO_PAD.decode(digest_b64) else {
        return false;
    };
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(plaintext.as_bytes());
    let digest = hasher.finalize();
    expected.len() == digest.len() && bool::from(digest.as_slice().ct_eq(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test-only constructor for the legacy format; production code never
    /// writes it.
    fn legacy_hash(plaintext: &str, salt: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(plaintext.as_bytes());
        format!(
            "{LEGACY_TAG}{}${}",
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(hasher.finalize())
        )
    }

    fn fast_params() -> HasherParams {
        // Keep unit tests quick; verification still reads params from the hash.
        HasherParams {
            memory_kib: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn hash_then_verify_round_trip() {
        let stored = hash("correct horse battery staple", &fast_params()).unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify("correct horse battery staple", &stored));
    }

    #[test]
    fn distinct_plaintexts_do_not_verify() {
        let stored = hash("secret-one", &fast_params()).unwrap();
        assert!(!verify("secret-two", &stored));
    }

    #[test]
    fn salt_randomization_changes_output() {
        let params = fast_params();
        let first = hash("same-input", &params).unwrap();
        let second = hash("same-input", &params).unwrap();
        assert_ne!(first, second);
        assert!(verify("same-input", &first));
        assert!(verify("same-input", &second));
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        assert_eq!(hash("", &fast_params()), Err(HashError::EmptyInput));
        let stored = hash("nonempty", &fast_params()).unwrap();
        assert!(!verify("", &stored));
    }

    #[test]
    fn malformed_stored_hash_fails_closed() {
        assert!(!verify("anything", ""));
        assert!(!verify("anything", "plaintext-left-over-from-v1"));
        assert!(!verify("anything", "$argon2id$v=19$truncated"));
        assert!(!verify("anything", "$md5$unknown$tag"));
    }

    #[test]
    fn legacy_hashes_still_verify() {
        let stored = legacy_hash("old-password", b"0123456789abcdef");
        assert!(verify("old-password", &stored));
        assert!(!verify("new-password", &stored));
    }

    #[test]
    fn tampered_legacy_hash_fails_closed() {
        let stored = legacy_hash("old-password", b"0123456789abcdef");
        let truncated = &stored[..stored.len() - 4];
        assert!(!verify("old-password", truncated));
        assert!(!verify("old-password", "$sha256$missing-digest"));
        assert!(!verify("old-password", "$sha256$!!!$!!!"));
    }

    #[test]
    fn rejected_params_surface_as_backend_error() {
        // Zero lanes is below the backend's minimum.
        let params = HasherParams {
            memory_kib: 8,
            time_cost: 1,
            parallelism: 0,
        };
        assert_eq!(hash("nonempty", &params), Err(HashError::Backend));
    }

    #[test]
    fn default_params_are_owasp_shaped() {
        let params = HasherParams::default();
        assert!(params.memory_kib >= 19_456);
        assert!(params.time_cost >= 2);
        assert!(params.parallelism >= 1);
    }
}
