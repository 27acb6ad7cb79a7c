//! The only mutation path for threat levels and victim account status.
//!
//! The guard reads the subject's current value, then hands the expected and
//! new values to the store's commit primitive, which applies the field
//! update and the audit entry as one atomic unit with an optimistic check
//! at commit time. If anything changed the subject between the read and the
//! commit, the caller gets `ConcurrentModification` and retries; nothing is
//! half-committed. This is what keeps the audit chain unbreakable: an
//! account field can never move without its matching log entry.

use tracing::info;

use crate::model::{AccountStatus, ThreatLevel};
use crate::store::{CredentialStore, StoreError, TransitionStore};

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("subject not found")]
    NotFound,
    #[error("subject changed concurrently; retry")]
    ConcurrentModification,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TransitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::ConcurrentModification,
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionGuard<S> {
    store: S,
}

impl<S: CredentialStore + TransitionStore> TransitionGuard<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move a perpetrator to a new threat level, appending the audit entry
    /// in the same unit of work. `administrator_id` is `None` only for
    /// system-initiated changes.
    ///
    /// Returns `false` without writing anything when the subject is already
    /// at the requested level.
    ///
    /// # Errors
    /// `NotFound` for an unknown perpetrator, `ConcurrentModification` when
    /// the level moved between read and commit, `Store` for backend failures.
    pub async fn change_threat_level(
        &self,
        perpetrator_id: i64,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<bool, TransitionError> {
        let current = self
            .store
            .find_perpetrator(perpetrator_id)
            .await
            .map_err(TransitionError::from)?
            .ok_or(TransitionError::NotFound)?
            .threat_level;
        if current == new_level {
            return Ok(false);
        }
        let log_id = self
            .store
            .commit_threat_level(perpetrator_id, current, new_level, administrator_id)
            .await?;
        info!(
            perpetrator_id,
            log_id,
            old = current.as_db(),
            new = new_level.as_db(),
            "threat level changed"
        );
        Ok(true)
    }

    /// Move a victim account to a new status; same contract as
    /// [`change_threat_level`](Self::change_threat_level).
    ///
    /// # Errors
    /// Same taxonomy as `change_threat_level`.
    pub async fn change_victim_status(
        &self,
        victim_id: i64,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<bool, TransitionError> {
        let current = self
            .store
            .find_victim(victim_id)
            .await
            .map_err(TransitionError::from)?
            .ok_or(TransitionError::NotFound)?
            .status;
        if current == new_status {
            return Ok(false);
        }
        let log_id = self
            .store
            .commit_victim_status(victim_id, current, new_status, administrator_id)
            .await?;
        info!(
            victim_id,
            log_id,
            old = current.as_db(),
            new = new_status.as_db(),
            "victim status changed"
        );
        Ok(true)
    }
}
