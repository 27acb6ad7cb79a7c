//! Persistence seam for accounts, perpetrators, and audit history.
//!
//! Two backends implement the traits below: [`pg::PgStore`] against Postgres
//! (the production path) and [`memory::MemoryStore`] for tests and embedders
//! running without a database. No hashing happens at this layer; callers
//! always pass an already-hashed credential.
//!
//! The threat-level and status fields are deliberately absent from the
//! profile-update operations: the only way to mutate them is through
//! [`TransitionStore`], which commits the field update together with its
//! audit entry as one atomic unit.

pub mod memory;
pub mod pg;

use chrono::{DateTime, Utc};

use crate::audit::{AuditEntry, StatusChange, ThreatLevelChange};
use crate::model::{
    AccountStatus, AdminRole, AdministratorAccount, Perpetrator, ThreatLevel, VictimAccount,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("contact email already registered")]
    DuplicateEmail,
    /// A credential hash, once set, is never empty; both backends reject
    /// the write before it reaches a row (the schema CHECK backstops it).
    #[error("credential hash must not be empty")]
    EmptyHash,
    #[error("account is referenced by audit history")]
    Referenced,
    #[error("subject changed since it was read")]
    Conflict,
    /// Backing store I/O or connectivity failure; surfaced to the caller,
    /// never retried here.
    #[error(transparent)]
    Unavailable(anyhow::Error),
}

/// Row data for creating a victim account. Status starts at the creation
/// default and is not part of the insert surface.
#[derive(Debug, Clone)]
pub struct NewVictim {
    pub display_name: String,
    pub contact_email: String,
    pub credential_hash: String,
}

/// Row data for creating an administrator account.
#[derive(Debug, Clone)]
pub struct NewAdministrator {
    pub display_name: String,
    pub contact_email: String,
    pub credential_hash: String,
    pub role: AdminRole,
}

/// Consecutive authentication-failure state for one email, used by the
/// opt-in throttle policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Account persistence keyed by id or normalized email.
///
/// Email lookups are case-insensitive; a missing row is `Ok(None)`, not an
/// error. Deleting an account that audit history still references fails with
/// [`StoreError::Referenced`] rather than orphaning the history.
#[allow(async_fn_in_trait)]
pub trait CredentialStore {
    async fn find_victim_by_email(&self, email: &str)
        -> Result<Option<VictimAccount>, StoreError>;
    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdministratorAccount>, StoreError>;
    async fn find_victim(&self, id: i64) -> Result<Option<VictimAccount>, StoreError>;
    async fn find_admin(&self, id: i64) -> Result<Option<AdministratorAccount>, StoreError>;
    async fn find_perpetrator(&self, id: i64) -> Result<Option<Perpetrator>, StoreError>;

    async fn create_victim(&self, victim: &NewVictim) -> Result<i64, StoreError>;
    async fn create_admin(&self, admin: &NewAdministrator) -> Result<i64, StoreError>;
    async fn create_perpetrator(&self, display_name: &str) -> Result<i64, StoreError>;

    /// Update the non-guarded victim fields. Returns whether the row
    /// existed; an empty `credential_hash` fails with
    /// [`StoreError::EmptyHash`] without touching the row.
    async fn update_victim_profile(
        &self,
        id: i64,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<bool, StoreError>;
    /// Update the non-guarded administrator fields.
    async fn update_admin_profile(
        &self,
        id: i64,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<bool, StoreError>;

    async fn delete_victim(&self, id: i64) -> Result<bool, StoreError>;
    async fn delete_admin(&self, id: i64) -> Result<bool, StoreError>;

    async fn auth_failure_state(&self, email: &str) -> Result<FailureState, StoreError>;
    async fn record_auth_failure(&self, email: &str, at: DateTime<Utc>)
        -> Result<(), StoreError>;
    async fn clear_auth_failures(&self, email: &str) -> Result<(), StoreError>;
}

/// Append-only audit history. `record_*` appends an immutable entry with a
/// server-assigned timestamp; nothing ever mutates or deletes prior entries.
/// The raw `record_*` operations exist for system-initiated entries
/// (`administrator_id: None`); account fields are never touched here.
#[allow(async_fn_in_trait)]
pub trait AuditLog {
    async fn record_threat_level_change(
        &self,
        perpetrator_id: i64,
        old_level: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError>;
    async fn record_status_change(
        &self,
        victim_id: i64,
        old_status: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError>;

    /// Chronological entries for one perpetrator, oldest first.
    async fn threat_changes_for(
        &self,
        perpetrator_id: i64,
    ) -> Result<Vec<ThreatLevelChange>, StoreError>;
    /// Chronological entries for one victim, oldest first.
    async fn status_changes_for(&self, victim_id: i64) -> Result<Vec<StatusChange>, StoreError>;
    /// Both entry kinds merged chronologically, for report rendering.
    async fn all_entries(&self) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Commit primitives for the guarded transition path.
///
/// Each commit applies the field update and its audit entry as one atomic
/// unit, re-checking the expected prior value at commit time. A mismatch
/// (or a subject deleted since the read) fails with [`StoreError::Conflict`]
/// and leaves nothing committed.
#[allow(async_fn_in_trait)]
pub trait TransitionStore {
    async fn commit_threat_level(
        &self,
        perpetrator_id: i64,
        expected: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError>;
    async fn commit_victim_status(
        &self,
        victim_id: i64,
        expected: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError>;
}
