//! In-memory backend for tests and embedders running without Postgres.
//!
//! All tables live behind one `tokio::sync::Mutex`, held only for the
//! duration of a single operation, so guarded commits are atomic the same
//! way the Postgres transaction is. Ids are per-table counters starting
//! at 1, matching the BIGSERIAL columns in `sql/schema.sql`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::audit::{AuditEntry, StatusChange, ThreatLevelChange};
use crate::model::{
    AccountStatus, AdministratorAccount, Perpetrator, ThreatLevel, VictimAccount,
};

use super::{
    AuditLog, CredentialStore, FailureState, NewAdministrator, NewVictim, StoreError,
    TransitionStore,
};

#[derive(Debug, Default)]
struct Tables {
    victims: HashMap<i64, VictimAccount>,
    admins: HashMap<i64, AdministratorAccount>,
    perpetrators: HashMap<i64, Perpetrator>,
    threat_log: Vec<ThreatLevelChange>,
    status_log: Vec<StatusChange>,
    failures: HashMap<String, FailureState>,
    next_victim_id: i64,
    next_admin_id: i64,
    next_perpetrator_id: i64,
    next_log_id: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Clonable in-memory store; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    async fn find_victim_by_email(
        &self,
        email: &str,
    ) -> Result<Option<VictimAccount>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .victims
            .values()
            .find(|row| row.contact_email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdministratorAccount>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .admins
            .values()
            .find(|row| row.contact_email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn find_victim(&self, id: i64) -> Result<Option<VictimAccount>, StoreError> {
        Ok(self.tables.lock().await.victims.get(&id).cloned())
    }

    async fn find_admin(&self, id: i64) -> Result<Option<AdministratorAccount>, StoreError> {
        Ok(self.tables.lock().await.admins.get(&id).cloned())
    }

    async fn find_perpetrator(&self, id: i64) -> Result<Option<Perpetrator>, StoreError> {
        Ok(self.tables.lock().await.perpetrators.get(&id).cloned())
    }

    async fn create_victim(&self, victim: &NewVictim) -> Result<i64, StoreError> {
        if victim.credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let mut tables = self.tables.lock().await;
        if tables
            .victims
            .values()
            .any(|row| row.contact_email.eq_ignore_ascii_case(&victim.contact_email))
        {
            return Err(StoreError::DuplicateEmail);
        }
        let id = next(&mut tables.next_victim_id);
        tables.victims.insert(
            id,
            VictimAccount {
                id,
                display_name: victim.display_name.clone(),
                contact_email: victim.contact_email.clone(),
                credential_hash: victim.credential_hash.clone(),
                status: AccountStatus::default(),
            },
        );
        Ok(id)
    }

    async fn create_admin(&self, admin: &NewAdministrator) -> Result<i64, StoreError> {
        if admin.credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let mut tables = self.tables.lock().await;
        if tables
            .admins
            .values()
            .any(|row| row.contact_email.eq_ignore_ascii_case(&admin.contact_email))
        {
            return Err(StoreError::DuplicateEmail);
        }
        let id = next(&mut tables.next_admin_id);
        tables.admins.insert(
            id,
            AdministratorAccount {
                id,
                display_name: admin.display_name.clone(),
                contact_email: admin.contact_email.clone(),
                credential_hash: admin.credential_hash.clone(),
                role: admin.role,
            },
        );
        Ok(id)
    }

    async fn create_perpetrator(&self, display_name: &str) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = next(&mut tables.next_perpetrator_id);
        tables.perpetrators.insert(
            id,
            Perpetrator {
                id,
                display_name: display_name.to_string(),
                threat_level: ThreatLevel::default(),
            },
        );
        Ok(id)
    }

    async fn update_victim_profile(
        &self,
        id: i64,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<bool, StoreError> {
        if credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let mut tables = self.tables.lock().await;
        match tables.victims.get_mut(&id) {
            Some(row) => {
                row.display_name = display_name.to_string();
                row.credential_hash = credential_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_admin_profile(
        &self,
        id: i64,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<bool, StoreError> {
        if credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let mut tables = self.tables.lock().await;
        match tables.admins.get_mut(&id) {
            Some(row) => {
                row.display_name = display_name.to_string();
                row.credential_hash = credential_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_victim(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.status_log.iter().any(|entry| entry.victim_id == id) {
            return Err(StoreError::Referenced);
        }
        Ok(tables.victims.remove(&id).is_some())
    }

    async fn delete_admin(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let referenced = tables
            .threat_log
            .iter()
            .any(|entry| entry.administrator_id == Some(id))
            || tables
                .status_log
                .iter()
                .any(|entry| entry.administrator_id == Some(id));
        if referenced {
            return Err(StoreError::Referenced);
        }
        Ok(tables.admins.remove(&id).is_some())
    }

    async fn auth_failure_state(&self, email: &str) -> Result<FailureState, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .failures
            .get(&email.trim().to_lowercase())
            .copied()
            .unwrap_or_default())
    }

    async fn record_auth_failure(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let state = tables
            .failures
            .entry(email.trim().to_lowercase())
            .or_default();
        state.consecutive += 1;
        state.last_failure = Some(at);
        Ok(())
    }

    async fn clear_auth_failures(&self, email: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.failures.remove(&email.trim().to_lowercase());
        Ok(())
    }
}

impl AuditLog for MemoryStore {
    async fn record_threat_level_change(
        &self,
        perpetrator_id: i64,
        old_level: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        let log_id = next(&mut tables.next_log_id);
        tables.threat_log.push(ThreatLevelChange {
            log_id,
            perpetrator_id,
            old_level,
            new_level,
            changed_at: Utc::now(),
            administrator_id,
        });
        Ok(log_id)
    }

    async fn record_status_change(
        &self,
        victim_id: i64,
        old_status: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        let log_id = next(&mut tables.next_log_id);
        tables.status_log.push(StatusChange {
            log_id,
            victim_id,
            old_status,
            new_status,
            changed_at: Utc::now(),
            administrator_id,
        });
        Ok(log_id)
    }

    async fn threat_changes_for(
        &self,
        perpetrator_id: i64,
    ) -> Result<Vec<ThreatLevelChange>, StoreError> {
        // The log vec is append-only, so it is already chronological.
        let tables = self.tables.lock().await;
        Ok(tables
            .threat_log
            .iter()
            .filter(|entry| entry.perpetrator_id == perpetrator_id)
            .cloned()
            .collect())
    }

    async fn status_changes_for(&self, victim_id: i64) -> Result<Vec<StatusChange>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .status_log
            .iter()
            .filter(|entry| entry.victim_id == victim_id)
            .cloned()
            .collect())
    }

    async fn all_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<AuditEntry> = tables
            .threat_log
            .iter()
            .cloned()
            .map(AuditEntry::ThreatLevel)
            .chain(tables.status_log.iter().cloned().map(AuditEntry::Status))
            .collect();
        entries.sort_by_key(|entry| (entry.changed_at(), entry.log_id()));
        Ok(entries)
    }
}

impl TransitionStore for MemoryStore {
    async fn commit_threat_level(
        &self,
        perpetrator_id: i64,
        expected: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        {
            let Some(perpetrator) = tables.perpetrators.get_mut(&perpetrator_id) else {
                return Err(StoreError::Conflict);
            };
            if perpetrator.threat_level != expected {
                return Err(StoreError::Conflict);
            }
            perpetrator.threat_level = new_level;
        }
        let log_id = next(&mut tables.next_log_id);
        tables.threat_log.push(ThreatLevelChange {
            log_id,
            perpetrator_id,
            old_level: expected,
            new_level,
            changed_at: Utc::now(),
            administrator_id,
        });
        Ok(log_id)
    }

    async fn commit_victim_status(
        &self,
        victim_id: i64,
        expected: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        {
            let Some(victim) = tables.victims.get_mut(&victim_id) else {
                return Err(StoreError::Conflict);
            };
            if victim.status != expected {
                return Err(StoreError::Conflict);
            }
            victim.status = new_status;
        }
        let log_id = next(&mut tables.next_log_id);
        tables.status_log.push(StatusChange {
            log_id,
            victim_id,
            old_status: expected,
            new_status,
            changed_at: Utc::now(),
            administrator_id,
        });
        Ok(log_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdminRole;

    fn victim(email: &str) -> NewVictim {
        NewVictim {
            display_name: "Test Victim".to_string(),
            contact_email: email.to_string(),
            credential_hash: "$argon2id$test".to_string(),
        }
    }

    #[tokio::test]
    async fn ids_start_at_one_per_table() {
        let store = MemoryStore::new();
        let victim_id = store.create_victim(&victim("v@example.com")).await.unwrap();
        let perpetrator_id = store.create_perpetrator("Mallory").await.unwrap();
        assert_eq!(victim_id, 1);
        assert_eq!(perpetrator_id, 1);
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        store.create_victim(&victim("alice@x.com")).await.unwrap();
        let found = store.find_victim_by_email(" ALICE@X.COM ").await.unwrap();
        assert!(found.is_some());
        assert!(store
            .find_victim_by_email("nobody@x.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_per_variant_namespace() {
        let store = MemoryStore::new();
        store.create_victim(&victim("dual@x.com")).await.unwrap();
        let err = store.create_victim(&victim("DUAL@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        // Same address is fine in the administrator namespace.
        let admin = NewAdministrator {
            display_name: "Dual".to_string(),
            contact_email: "dual@x.com".to_string(),
            credential_hash: "$argon2id$test".to_string(),
            role: AdminRole::SystemAdmin,
        };
        assert!(store.create_admin(&admin).await.is_ok());
    }

    #[tokio::test]
    async fn profile_updates_leave_guarded_fields_alone() {
        let store = MemoryStore::new();
        let victim_id = store.create_victim(&victim("v@x.com")).await.unwrap();
        store
            .commit_victim_status(
                victim_id,
                AccountStatus::Active,
                AccountStatus::Flagged,
                None,
            )
            .await
            .unwrap();
        let admin = NewAdministrator {
            display_name: "Staff".to_string(),
            contact_email: "staff@x.com".to_string(),
            credential_hash: "$argon2id$test".to_string(),
            role: AdminRole::CybersecurityStaff,
        };
        let admin_id = store.create_admin(&admin).await.unwrap();

        assert!(store
            .update_victim_profile(victim_id, "Alice Renamed", "$argon2id$rotated")
            .await
            .unwrap());
        let row = store.find_victim(victim_id).await.unwrap().unwrap();
        assert_eq!(row.display_name, "Alice Renamed");
        assert_eq!(row.credential_hash, "$argon2id$rotated");
        // Status only moves through the guarded commit path.
        assert_eq!(row.status, AccountStatus::Flagged);

        assert!(store
            .update_admin_profile(admin_id, "Staff Renamed", "$argon2id$rotated")
            .await
            .unwrap());
        let row = store.find_admin(admin_id).await.unwrap().unwrap();
        assert_eq!(row.display_name, "Staff Renamed");
        assert_eq!(row.role, AdminRole::CybersecurityStaff);

        // A missing row reports false rather than an error.
        assert!(!store
            .update_victim_profile(99, "Nobody", "$argon2id$test")
            .await
            .unwrap());
        assert!(!store
            .update_admin_profile(99, "Nobody", "$argon2id$test")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn empty_credential_hash_never_reaches_a_row() {
        let store = MemoryStore::new();
        let id = store.create_victim(&victim("v@x.com")).await.unwrap();

        let err = store
            .update_victim_profile(id, "Alice", "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyHash));
        let row = store.find_victim(id).await.unwrap().unwrap();
        assert_eq!(row.credential_hash, "$argon2id$test");

        let mut empty = victim("empty@x.com");
        empty.credential_hash = String::new();
        let err = store.create_victim(&empty).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyHash));

        let err = store.update_admin_profile(1, "Staff", "").await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyHash));
    }

    #[tokio::test]
    async fn commit_rejects_stale_expected_value() {
        let store = MemoryStore::new();
        let id = store.create_perpetrator("Mallory").await.unwrap();
        store
            .commit_threat_level(id, ThreatLevel::Suspected, ThreatLevel::Malicious, Some(1))
            .await
            .unwrap();
        let err = store
            .commit_threat_level(id, ThreatLevel::Suspected, ThreatLevel::Critical, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        // The failed commit must not have appended anything.
        assert_eq!(store.threat_changes_for(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_refused_while_audit_history_references() {
        let store = MemoryStore::new();
        let victim_id = store.create_victim(&victim("v@x.com")).await.unwrap();
        store
            .commit_victim_status(
                victim_id,
                AccountStatus::Active,
                AccountStatus::Flagged,
                Some(4),
            )
            .await
            .unwrap();
        let err = store.delete_victim(victim_id).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced));
    }

    #[tokio::test]
    async fn failure_counters_accumulate_and_clear() {
        let store = MemoryStore::new();
        store
            .record_auth_failure("a@x.com", Utc::now())
            .await
            .unwrap();
        store
            .record_auth_failure("A@X.com", Utc::now())
            .await
            .unwrap();
        let state = store.auth_failure_state("a@x.com").await.unwrap();
        assert_eq!(state.consecutive, 2);
        assert!(state.last_failure.is_some());
        store.clear_auth_failures("a@x.com").await.unwrap();
        let state = store.auth_failure_state("a@x.com").await.unwrap();
        assert_eq!(state, FailureState::default());
    }

    #[tokio::test]
    async fn all_entries_merges_both_kinds_chronologically() {
        let store = MemoryStore::new();
        let victim_id = store.create_victim(&victim("v@x.com")).await.unwrap();
        let perpetrator_id = store.create_perpetrator("Mallory").await.unwrap();
        store
            .commit_threat_level(
                perpetrator_id,
                ThreatLevel::Suspected,
                ThreatLevel::Malicious,
                None,
            )
            .await
            .unwrap();
        store
            .commit_victim_status(
                victim_id,
                AccountStatus::Active,
                AccountStatus::Suspended,
                None,
            )
            .await
            .unwrap();
        let entries = store.all_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].changed_at() <= entries[1].changed_at());
        assert!(matches!(entries[0], AuditEntry::ThreatLevel(_)));
        assert!(matches!(entries[1], AuditEntry::Status(_)));
    }
}
