//! Authentication and registration for victim and administrator accounts.
//!
//! Flow Overview:
//! 1) Validate and normalize the submitted email and plaintext.
//! 2) Look up the account by normalized email within its variant namespace.
//! 3) Verify the credential; missing account and wrong password both come
//!    back as the same `InvalidCredentials`, and a missing account still
//!    burns one verification so the two paths cost the same.
//!
//! Propagation policy: plaintext credentials are never logged, and emails
//! only appear in log output masked.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use crate::model::{AccountKind, Principal};
use crate::password::{self, HashError, HasherParams};
use crate::store::{CredentialStore, NewVictim, StoreError};

/// Registration and throttling knobs.
///
/// Throttling is opt-in: with `max_failures` at 0 (the default) failed
/// attempts leave no state behind at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Minimum plaintext length accepted at registration.
    pub min_password_len: usize,
    /// Consecutive failures before throttling kicks in; 0 disables it.
    pub max_failures: u32,
    /// How long a throttled email stays rejected after its last failure.
    pub cooldown: std::time::Duration,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_password_len: 8,
            max_failures: 0,
            cooldown: std::time::Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(&'static str),
    /// Deliberately indistinguishable between "no such account" and
    /// "wrong password".
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many failed attempts; retry later")]
    Throttled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("password must be at least {minimum} characters")]
    WeakCredential { minimum: usize },
    #[error("contact email already registered")]
    DuplicateEmail,
    #[error("failed to hash credential")]
    Hashing(#[source] HashError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::DuplicateEmail,
            other => Self::Store(other),
        }
    }
}

/// Looked-up credential material plus the principal it would authenticate.
struct Candidate {
    credential_hash: String,
    principal: Principal,
}

#[derive(Debug, Clone)]
pub struct AuthService<S> {
    store: S,
    policy: CredentialPolicy,
    hasher: HasherParams,
    // Hashed once on first miss; verified against on unknown emails so the
    // not-found path costs the same as a wrong password.
    decoy: OnceLock<String>,
}

impl<S: CredentialStore> AuthService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_policy(store, CredentialPolicy::default(), HasherParams::default())
    }

    #[must_use]
    pub fn with_policy(store: S, policy: CredentialPolicy, hasher: HasherParams) -> Self {
        Self {
            store,
            policy,
            hasher,
            decoy: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Authenticate a credential pair against one account namespace.
    ///
    /// # Errors
    /// `Validation` for malformed input, `Throttled` when the opt-in failure
    /// throttle is active, `InvalidCredentials` for every rejection that
    /// would otherwise reveal whether the account exists, and `Store` when
    /// the backing store fails.
    pub async fn authenticate(
        &self,
        email: &str,
        plaintext: &str,
        kind: AccountKind,
    ) -> Result<Principal, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::Validation("contact email is not well formed"));
        }
        if plaintext.is_empty() {
            return Err(AuthError::Validation("password must not be empty"));
        }
        self.check_throttle(&email).await?;

        let candidate = match kind {
            AccountKind::User => {
                self.store
                    .find_victim_by_email(&email)
                    .await?
                    .map(|account| Candidate {
                        credential_hash: account.credential_hash.clone(),
                        principal: Principal::user(&account),
                    })
            }
            AccountKind::Admin => {
                self.store
                    .find_admin_by_email(&email)
                    .await?
                    .map(|account| Candidate {
                        credential_hash: account.credential_hash.clone(),
                        principal: Principal::admin(&account),
                    })
            }
        };

        match candidate {
            Some(candidate) if password::verify(plaintext, &candidate.credential_hash) => {
                if self.policy.max_failures > 0 {
                    self.store.clear_auth_failures(&email).await?;
                }
                debug!(email = %mask_email(&email), kind = ?kind, "authentication accepted");
                Ok(candidate.principal)
            }
            found => {
                if found.is_none() {
                    let _ = password::verify(plaintext, self.decoy_hash());
                }
                if self.policy.max_failures > 0 {
                    self.store.record_auth_failure(&email, Utc::now()).await?;
                }
                debug!(email = %mask_email(&email), kind = ?kind, "authentication rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Victim self-service registration.
    ///
    /// # Errors
    /// `Validation` for malformed input, `WeakCredential` below the policy
    /// minimum, `DuplicateEmail` when the normalized address is taken, and
    /// `Store` when persistence fails.
    pub async fn register(
        &self,
        display_name: &str,
        email: &str,
        plaintext: &str,
    ) -> Result<i64, RegistrationError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(RegistrationError::Validation("display name must not be empty"));
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(RegistrationError::Validation("contact email is not well formed"));
        }
        if plaintext.is_empty() {
            return Err(RegistrationError::Validation("password must not be empty"));
        }
        if plaintext.len() < self.policy.min_password_len {
            return Err(RegistrationError::WeakCredential {
                minimum: self.policy.min_password_len,
            });
        }
        if self.store.find_victim_by_email(&email).await?.is_some() {
            return Err(RegistrationError::DuplicateEmail);
        }

        let credential_hash =
            password::hash(plaintext, &self.hasher).map_err(RegistrationError::Hashing)?;
        // The unique index still backstops a racing registration here.
        let id = self
            .store
            .create_victim(&NewVictim {
                display_name: display_name.to_string(),
                contact_email: email.clone(),
                credential_hash,
            })
            .await?;
        debug!(email = %mask_email(&email), id, "victim account registered");
        Ok(id)
    }

    async fn check_throttle(&self, email: &str) -> Result<(), AuthError> {
        if self.policy.max_failures == 0 {
            return Ok(());
        }
        let state = self.store.auth_failure_state(email).await?;
        if state.consecutive < self.policy.max_failures {
            return Ok(());
        }
        let cooldown =
            chrono::Duration::from_std(self.policy.cooldown).unwrap_or(chrono::Duration::MAX);
        if state
            .last_failure
            .is_some_and(|last| Utc::now().signed_duration_since(last) < cooldown)
        {
            warn!(email = %mask_email(email), "authentication throttled");
            return Err(AuthError::Throttled);
        }
        Ok(())
    }

    fn decoy_hash(&self) -> &str {
        self.decoy.get_or_init(|| {
            password::hash("never-a-real-credential", &self.hasher).unwrap_or_default()
        })
    }
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input: an '@' with non-empty
/// local and domain parts.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Mask an email for log output, keeping the first character and the domain.
pub(crate) fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let head = local.chars().next().map(String::from).unwrap_or_default();
            format!("{head}***@{domain}")
        }
        None => "***".to_string(),
    }
}
