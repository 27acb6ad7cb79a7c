//! Domain types shared across the credential and audit modules.
//!
//! Enum values persist as lowercase snake-case text; `from_db`/`as_db` keep
//! the mapping strict so an unexpected database value surfaces as a decode
//! error instead of a silent default.

use serde::{Deserialize, Serialize};

/// Account variant namespace used for lookups and principals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    User,
    Admin,
}

/// Standing of a victim account. `Active` is the creation default; the field
/// is only ever mutated through the guarded transition path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Flagged,
    Suspended,
}

impl AccountStatus {
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Flagged => "flagged",
            Self::Suspended => "suspended",
        }
    }

    /// Parse the persisted textual value into a typed status.
    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "flagged" => Some(Self::Flagged),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Assessed threat level of a perpetrator. New subjects start at `Suspected`;
/// the field is only ever mutated through the guarded transition path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    #[default]
    Suspected,
    Malicious,
    Critical,
}

impl ThreatLevel {
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Suspected => "suspected",
            Self::Malicious => "malicious",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "suspected" => Some(Self::Suspected),
            "malicious" => Some(Self::Malicious),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Administrator role. Role distinction is the only authorization the core
/// performs; policy beyond it belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    SystemAdmin,
    CybersecurityStaff,
}

impl AdminRole {
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::SystemAdmin => "system_admin",
            Self::CybersecurityStaff => "cybersecurity_staff",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "system_admin" => Some(Self::SystemAdmin),
            "cybersecurity_staff" => Some(Self::CybersecurityStaff),
            _ => None,
        }
    }
}

/// A victim account row. Emails are stored normalized (trimmed, lowercase)
/// and compared case-insensitively. The credential hash never serializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimAccount {
    pub id: i64,
    pub display_name: String,
    pub contact_email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub status: AccountStatus,
}

/// An administrator account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministratorAccount {
    pub id: i64,
    pub display_name: String,
    pub contact_email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub role: AdminRole,
}

/// A perpetrator record. Only the threat level matters to this core; the
/// incident CRUD around it lives in the calling application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perpetrator {
    pub id: i64,
    pub display_name: String,
    pub threat_level: ThreatLevel,
}

/// The authenticated identity bound to a session. Created only by successful
/// authentication; carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub kind: AccountKind,
    pub account_id: i64,
    pub display_name: String,
    pub contact_email: String,
}

impl Principal {
    #[must_use]
    pub fn user(account: &VictimAccount) -> Self {
        Self {
            kind: AccountKind::User,
            account_id: account.id,
            display_name: account.display_name.clone(),
            contact_email: account.contact_email.clone(),
        }
    }

    #[must_use]
    pub fn admin(account: &AdministratorAccount) -> Self {
        Self {
            kind: AccountKind::Admin,
            account_id: account.id,
            display_name: account.display_name.clone(),
            contact_email: account.contact_email.clone(),
        }
    }
}
