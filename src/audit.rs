//! Append-only audit entries for sensitive state transitions.
//!
//! Every threat-level and account-status change is recorded with its actor
//! and a server-assigned timestamp. Entries are immutable once written and
//! returned in chronological order, oldest first. For any subject the old
//! values must chain: entry *n*'s old value equals entry *n-1*'s new value,
//! and the first entry's old value equals the subject's creation default.
//! The guarded write path enforces this by construction; `verify_*_chain`
//! lets reporting collaborators validate a sequence they read back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AccountStatus, ThreatLevel};

/// One recorded threat-level transition for a perpetrator.
/// `administrator_id` is `None` only for system-initiated changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatLevelChange {
    pub log_id: i64,
    pub perpetrator_id: i64,
    pub old_level: ThreatLevel,
    pub new_level: ThreatLevel,
    pub changed_at: DateTime<Utc>,
    pub administrator_id: Option<i64>,
}

/// One recorded account-status transition for a victim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub log_id: i64,
    pub victim_id: i64,
    pub old_status: AccountStatus,
    pub new_status: AccountStatus,
    pub changed_at: DateTime<Utc>,
    pub administrator_id: Option<i64>,
}

/// Either entry kind, for reporting collaborators that render the full log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    ThreatLevel(ThreatLevelChange),
    Status(StatusChange),
}

impl AuditEntry {
    #[must_use]
    pub fn changed_at(&self) -> DateTime<Utc> {
        match self {
            Self::ThreatLevel(change) => change.changed_at,
            Self::Status(change) => change.changed_at,
        }
    }

    #[must_use]
    pub fn log_id(&self) -> i64 {
        match self {
            Self::ThreatLevel(change) => change.log_id,
            Self::Status(change) => change.log_id,
        }
    }

    #[must_use]
    pub fn administrator_id(&self) -> Option<i64> {
        match self {
            Self::ThreatLevel(change) => change.administrator_id,
            Self::Status(change) => change.administrator_id,
        }
    }
}

/// First break found while validating an audit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("audit entry {index} is out of chronological order")]
    OutOfOrder { index: usize },
    #[error("audit entry {index} does not chain from its predecessor")]
    Broken { index: usize },
}

/// Validate the threat-level chain for one perpetrator's entries,
/// oldest first.
///
/// # Errors
/// Returns the index of the first entry that is out of order or whose old
/// level does not match its predecessor's new level.
pub fn verify_threat_chain(
    entries: &[ThreatLevelChange],
    creation_default: ThreatLevel,
) -> Result<(), ChainError> {
    verify_chain(
        entries
            .iter()
            .map(|entry| (entry.changed_at, entry.old_level, entry.new_level)),
        creation_default,
    )
}

/// Validate the status chain for one victim's entries, oldest first.
///
/// # Errors
/// Same contract as [`verify_threat_chain`].
pub fn verify_status_chain(
    entries: &[StatusChange],
    creation_default: AccountStatus,
) -> Result<(), ChainError> {
    verify_chain(
        entries
            .iter()
            .map(|entry| (entry.changed_at, entry.old_status, entry.new_status)),
        creation_default,
    )
}

fn verify_chain<T>(
    steps: impl Iterator<Item = (DateTime<Utc>, T, T)>,
    creation_default: T,
) -> Result<(), ChainError>
where
    T: PartialEq + Copy,
{
    let mut previous_at: Option<DateTime<Utc>> = None;
    let mut expected = creation_default;
    for (index, (changed_at, old, new)) in steps.enumerate() {
        if previous_at.is_some_and(|prev| changed_at < prev) {
            return Err(ChainError::OutOfOrder { index });
        }
        if old != expected {
            return Err(ChainError::Broken { index });
        }
        expected = new;
        previous_at = Some(changed_at);
    }
    Ok(())
}
