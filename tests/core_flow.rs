//! End-to-end flow over the in-memory backend: registration, authentication,
//! session binding, guarded transitions, and audit reporting.

use custodia::audit::{verify_status_chain, verify_threat_chain, AuditEntry};
use custodia::auth::{AuthError, AuthService, CredentialPolicy, RegistrationError};
use custodia::guard::{TransitionError, TransitionGuard};
use custodia::model::{AccountKind, AccountStatus, AdminRole, ThreatLevel};
use custodia::password::HasherParams;
use custodia::session::SessionContext;
use custodia::store::memory::MemoryStore;
use custodia::store::{
    AuditLog, CredentialStore, NewAdministrator, StoreError, TransitionStore,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_params() -> HasherParams {
    HasherParams {
        memory_kib: 8,
        time_cost: 1,
        parallelism: 1,
    }
}

fn auth_service(store: MemoryStore) -> AuthService<MemoryStore> {
    AuthService::with_policy(store, CredentialPolicy::default(), fast_params())
}

async fn seed_admin(store: &MemoryStore, email: &str, plaintext: &str) -> i64 {
    let credential_hash = custodia::password::hash(plaintext, &fast_params()).unwrap();
    store
        .create_admin(&NewAdministrator {
            display_name: "Cyber Staff".to_string(),
            contact_email: email.to_string(),
            credential_hash,
            role: AdminRole::CybersecurityStaff,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn register_authenticate_and_bind_session() {
    let store = MemoryStore::new();
    let auth = auth_service(store);

    let id = auth
        .register("Alice", "alice@x.com", "secret-enough-1")
        .await
        .unwrap();
    assert!(id >= 1);

    // Duplicate registration under a different display name fails.
    let err = auth
        .register("Bob", "alice@x.com", "secret-enough-2")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateEmail));

    let principal = auth
        .authenticate("Alice@X.com", "secret-enough-1", AccountKind::User)
        .await
        .unwrap();

    let mut session = SessionContext::new();
    assert!(!session.is_user() && !session.is_admin());
    session.activate(principal);
    assert!(session.is_user());
    assert!(!session.is_admin());
    assert_eq!(session.current().map(|p| p.account_id), Some(id));

    session.deactivate();
    assert!(session.current().is_none());
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_identical_failures() {
    let store = MemoryStore::new();
    let auth = auth_service(store);
    auth.register("Alice", "alice@x.com", "secret-enough-1")
        .await
        .unwrap();

    let wrong = auth
        .authenticate("alice@x.com", "wrongpass", AccountKind::User)
        .await
        .unwrap_err();
    let unknown = auth
        .authenticate("noone@x.com", "anything", AccountKind::User)
        .await
        .unwrap_err();
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
}

#[tokio::test]
async fn administrator_drives_guarded_transitions_with_audit_trail() {
    init_tracing();
    let store = MemoryStore::new();
    seed_admin(&store, "staff1@agency.gov", "staff-secret-1").await;
    let admin_id = seed_admin(&store, "staff2@agency.gov", "staff-secret-2").await;
    assert_eq!(admin_id, 2);

    for index in 0..7 {
        store
            .create_perpetrator(&format!("Subject {index}"))
            .await
            .unwrap();
    }

    let auth = auth_service(store.clone());
    let admin = auth
        .authenticate("staff2@agency.gov", "staff-secret-2", AccountKind::Admin)
        .await
        .unwrap();
    let mut session = SessionContext::new();
    session.activate(admin);
    assert!(session.is_admin());

    // Perpetrator #7 starts at Suspected; admin #2 escalates to Malicious.
    let guard = TransitionGuard::new(store.clone());
    let changed = guard
        .change_threat_level(7, ThreatLevel::Malicious, Some(admin_id))
        .await
        .unwrap();
    assert!(changed);

    let perpetrator = store.find_perpetrator(7).await.unwrap().unwrap();
    assert_eq!(perpetrator.threat_level, ThreatLevel::Malicious);

    let history = store.threat_changes_for(7).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].perpetrator_id, 7);
    assert_eq!(history[0].old_level, ThreatLevel::Suspected);
    assert_eq!(history[0].new_level, ThreatLevel::Malicious);
    assert_eq!(history[0].administrator_id, Some(admin_id));

    // Further changes keep the chain valid.
    guard
        .change_threat_level(7, ThreatLevel::Critical, Some(admin_id))
        .await
        .unwrap();
    let history = store.threat_changes_for(7).await.unwrap();
    assert_eq!(verify_threat_chain(&history, ThreatLevel::Suspected), Ok(()));
    assert_eq!(history[1].old_level, history[0].new_level);
}

#[tokio::test]
async fn victim_status_transitions_chain_and_block_deletion() {
    let store = MemoryStore::new();
    let admin_id = seed_admin(&store, "staff@agency.gov", "staff-secret-1").await;
    let auth = auth_service(store.clone());
    let victim_id = auth
        .register("Alice", "alice@x.com", "secret-enough-1")
        .await
        .unwrap();

    let guard = TransitionGuard::new(store.clone());
    guard
        .change_victim_status(victim_id, AccountStatus::Flagged, Some(admin_id))
        .await
        .unwrap();
    guard
        .change_victim_status(victim_id, AccountStatus::Suspended, Some(admin_id))
        .await
        .unwrap();

    let history = store.status_changes_for(victim_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(verify_status_chain(&history, AccountStatus::Active), Ok(()));

    // Audit history pins both the victim and the acting administrator.
    let err = store.delete_victim(victim_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced));
    let err = store.delete_admin(admin_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced));
}

#[tokio::test]
async fn concurrent_escalations_only_commit_once() {
    let store = MemoryStore::new();
    let id = store.create_perpetrator("Mallory").await.unwrap();
    let guard = TransitionGuard::new(store.clone());

    // Both writers read Suspected; only the first commit wins.
    let first = store
        .commit_threat_level(id, ThreatLevel::Suspected, ThreatLevel::Malicious, Some(1))
        .await;
    let second = store
        .commit_threat_level(id, ThreatLevel::Suspected, ThreatLevel::Critical, Some(2))
        .await;
    assert!(first.is_ok());
    assert!(matches!(second, Err(StoreError::Conflict)));

    // The guard surfaces the same race as ConcurrentModification and a
    // retry from the fresh value succeeds.
    let retried = guard
        .change_threat_level(id, ThreatLevel::Critical, Some(2))
        .await
        .unwrap();
    assert!(retried);

    let history = store.threat_changes_for(id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(verify_threat_chain(&history, ThreatLevel::Suspected), Ok(()));
}

#[tokio::test]
async fn guard_not_found_for_missing_subjects() {
    let guard = TransitionGuard::new(MemoryStore::new());
    assert!(matches!(
        guard.change_threat_level(99, ThreatLevel::Malicious, None).await,
        Err(TransitionError::NotFound)
    ));
    assert!(matches!(
        guard.change_victim_status(99, AccountStatus::Flagged, None).await,
        Err(TransitionError::NotFound)
    ));
}

#[tokio::test]
async fn report_feed_merges_both_log_kinds() {
    let store = MemoryStore::new();
    let auth = auth_service(store.clone());
    let victim_id = auth
        .register("Alice", "alice@x.com", "secret-enough-1")
        .await
        .unwrap();
    let perpetrator_id = store.create_perpetrator("Mallory").await.unwrap();

    let guard = TransitionGuard::new(store.clone());
    guard
        .change_threat_level(perpetrator_id, ThreatLevel::Malicious, None)
        .await
        .unwrap();
    guard
        .change_victim_status(victim_id, AccountStatus::Flagged, None)
        .await
        .unwrap();
    // System-initiated entries may also be appended directly.
    store
        .record_status_change(
            victim_id,
            AccountStatus::Flagged,
            AccountStatus::Active,
            None,
        )
        .await
        .unwrap();

    let entries = store.all_entries().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .windows(2)
        .all(|pair| pair[0].changed_at() <= pair[1].changed_at()));
    assert!(entries
        .iter()
        .all(|entry| entry.administrator_id().is_none()));
    assert!(matches!(entries[0], AuditEntry::ThreatLevel(_)));
}
