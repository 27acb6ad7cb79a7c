//! In-process "current actor" state.
//!
//! A `SessionContext` is an explicit value threaded through (or injected
//! per request by) the calling application, not a process-wide global, so a
//! networked or multi-tenant embedder stays safe by construction. It is not
//! a security boundary across processes and must not be relied on for
//! cross-request isolation if ever exposed over a network.

use crate::model::{AccountKind, Principal};

/// Holder for at most one authenticated principal.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    principal: Option<Principal>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a principal, replacing any prior one.
    pub fn activate(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Clear the session. Idempotent.
    pub fn deactivate(&mut self) {
        self.principal = None;
    }

    #[must_use]
    pub fn current(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.principal
            .as_ref()
            .is_some_and(|principal| principal.kind == AccountKind::Admin)
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.principal
            .as_ref()
            .is_some_and(|principal| principal.kind == AccountKind::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(kind: AccountKind, account_id: i64) -> Principal {
        Principal {
            kind,
            account_id,
            display_name: "Someone".to_string(),
            contact_email: "someone@example.com".to_string(),
        }
    }

    #[test]
    fn empty_context_has_no_role() {
        let context = SessionContext::new();
        assert!(context.current().is_none());
        assert!(!context.is_admin());
        assert!(!context.is_user());
    }

    #[test]
    fn role_queries_are_mutually_exclusive() {
        let mut context = SessionContext::new();
        context.activate(principal(AccountKind::User, 1));
        assert!(context.is_user());
        assert!(!context.is_admin());

        context.activate(principal(AccountKind::Admin, 2));
        assert!(context.is_admin());
        assert!(!context.is_user());
    }

    #[test]
    fn activate_overwrites_prior_principal() {
        let mut context = SessionContext::new();
        context.activate(principal(AccountKind::User, 1));
        context.activate(principal(AccountKind::User, 2));
        assert_eq!(context.current().map(|p| p.account_id), Some(2));
    }

    #[test]
    fn deactivate_clears_everything() {
        let mut context = SessionContext::new();
        context.activate(principal(AccountKind::Admin, 1));
        context.deactivate();
        assert!(context.current().is_none());
        assert!(!context.is_admin());
        context.deactivate();
        assert!(context.current().is_none());
    }
}
