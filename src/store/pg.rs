//! Postgres backend for the credential and audit stores.
//!
//! Every query runs under a `db.query` tracing span. Connections come from a
//! shared pool, acquired per operation and released on every exit path;
//! nothing here holds a connection across unrelated work. Guarded commits
//! wrap the field update and the audit insert in one transaction with the
//! optimistic check in the UPDATE's WHERE clause, so a racing administrator
//! cannot commit against a stale value.

use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::Instrument;

use crate::audit::{AuditEntry, StatusChange, ThreatLevelChange};
use crate::model::{
    AccountStatus, AdminRole, AdministratorAccount, Perpetrator, ThreatLevel, VictimAccount,
};

use super::{
    AuditLog, CredentialStore, FailureState, NewAdministrator, NewVictim, StoreError,
    TransitionStore,
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool and a bounded acquire timeout.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the connection string is invalid
    /// or the server is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await
            .map(Self::new)
            .map_err(unavailable("failed to connect to backing store"))
    }

    /// Apply `sql/schema.sql` (idempotent; every statement is IF NOT EXISTS).
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if any statement fails.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(unavailable("failed to apply schema"))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| StoreError::Unavailable(anyhow::Error::new(err).context(context))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23503"),
        _ => false,
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} value: {value}"),
    )))
}

impl FromRow<'_, PgRow> for VictimAccount {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            contact_email: row.try_get("contact_email")?,
            credential_hash: row.try_get("credential_hash")?,
            status: AccountStatus::from_db(&status)
                .ok_or_else(|| decode_error("victims.status", &status))?,
        })
    }
}

impl FromRow<'_, PgRow> for AdministratorAccount {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            contact_email: row.try_get("contact_email")?,
            credential_hash: row.try_get("credential_hash")?,
            role: AdminRole::from_db(&role)
                .ok_or_else(|| decode_error("administrators.role", &role))?,
        })
    }
}

impl FromRow<'_, PgRow> for Perpetrator {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let threat_level: String = row.try_get("threat_level")?;
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            threat_level: ThreatLevel::from_db(&threat_level)
                .ok_or_else(|| decode_error("perpetrators.threat_level", &threat_level))?,
        })
    }
}

impl FromRow<'_, PgRow> for ThreatLevelChange {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let old_level: String = row.try_get("old_level")?;
        let new_level: String = row.try_get("new_level")?;
        Ok(Self {
            log_id: row.try_get("log_id")?,
            perpetrator_id: row.try_get("perpetrator_id")?,
            old_level: ThreatLevel::from_db(&old_level)
                .ok_or_else(|| decode_error("threat_level_log.old_level", &old_level))?,
            new_level: ThreatLevel::from_db(&new_level)
                .ok_or_else(|| decode_error("threat_level_log.new_level", &new_level))?,
            changed_at: row.try_get("changed_at")?,
            administrator_id: row.try_get("administrator_id")?,
        })
    }
}

impl FromRow<'_, PgRow> for StatusChange {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let old_status: String = row.try_get("old_status")?;
        let new_status: String = row.try_get("new_status")?;
        Ok(Self {
            log_id: row.try_get("log_id")?,
            victim_id: row.try_get("victim_id")?,
            old_status: AccountStatus::from_db(&old_status)
                .ok_or_else(|| decode_error("status_log.old_status", &old_status))?,
            new_status: AccountStatus::from_db(&new_status)
                .ok_or_else(|| decode_error("status_log.new_status", &new_status))?,
            changed_at: row.try_get("changed_at")?,
            administrator_id: row.try_get("administrator_id")?,
        })
    }
}

impl CredentialStore for PgStore {
    async fn find_victim_by_email(
        &self,
        email: &str,
    ) -> Result<Option<VictimAccount>, StoreError> {
        let query = "SELECT id, display_name, contact_email, credential_hash, status \
                     FROM victims WHERE LOWER(contact_email) = LOWER(TRIM($1))";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, VictimAccount>(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to look up victim by email"))
    }

    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdministratorAccount>, StoreError> {
        let query = "SELECT id, display_name, contact_email, credential_hash, role \
                     FROM administrators WHERE LOWER(contact_email) = LOWER(TRIM($1))";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, AdministratorAccount>(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to look up administrator by email"))
    }

    async fn find_victim(&self, id: i64) -> Result<Option<VictimAccount>, StoreError> {
        let query = "SELECT id, display_name, contact_email, credential_hash, status \
                     FROM victims WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, VictimAccount>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to look up victim"))
    }

    async fn find_admin(&self, id: i64) -> Result<Option<AdministratorAccount>, StoreError> {
        let query = "SELECT id, display_name, contact_email, credential_hash, role \
                     FROM administrators WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, AdministratorAccount>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to look up administrator"))
    }

    async fn find_perpetrator(&self, id: i64) -> Result<Option<Perpetrator>, StoreError> {
        let query = "SELECT id, display_name, threat_level FROM perpetrators WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, Perpetrator>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to look up perpetrator"))
    }

    async fn create_victim(&self, victim: &NewVictim) -> Result<i64, StoreError> {
        if victim.credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let query = "INSERT INTO victims (display_name, contact_email, credential_hash) \
                     VALUES ($1, LOWER(TRIM($2)), $3) RETURNING id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&victim.display_name)
            .bind(&victim.contact_email)
            .bind(&victim.credential_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicateEmail
                } else {
                    unavailable("failed to insert victim")(err)
                }
            })?;
        Ok(row.get("id"))
    }

    async fn create_admin(&self, admin: &NewAdministrator) -> Result<i64, StoreError> {
        if admin.credential_hash.is_empty() {
            return Err(StoreError::EmptyHash);
        }
        let query = "INSERT INTO administrators (display_name, contact_email, credential_hash, role) \
                     VALUES ($1, LOWER(TRIM($2)), $3, $4) RETURNING id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&admin.display_name)
            .bind(&admin.contact_email)
            .bind(&admin.credential_hash)
            .bind(admin.role.as_db())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicateEmail
                } else {
                    unavailable("failed to insert administrator")(err)
                }
            })?;
        Ok(row.get("id"))
    }

    async fn create_perpetrator(&self, display_name: &str) -> Result<i64, StoreError> {
        let query = "INSERT INTO perpetrators (display_name) VALUES ($1) RETURNING id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(display_name)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to insert perpetrator"))?;
        Ok(row.get("id"))
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
        // Status is deliberately not updatable here; the guard owns it.
        let query = "UPDATE victims SET display_name = $1, credential_hash = $2 WHERE id = $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(display_name)
            .bind(credential_hash)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(unavailable("failed to update victim profile"))
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
        let query =
            "UPDATE administrators SET display_name = $1, credential_hash = $2 WHERE id = $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(display_name)
            .bind(credential_hash)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(unavailable("failed to update administrator profile"))
    }

    async fn delete_victim(&self, id: i64) -> Result<bool, StoreError> {
        // ON DELETE RESTRICT on status_log turns a referenced delete into 23503.
        let query = "DELETE FROM victims WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::Referenced
                } else {
                    unavailable("failed to delete victim")(err)
                }
            })
    }

    async fn delete_admin(&self, id: i64) -> Result<bool, StoreError> {
        let query = "DELETE FROM administrators WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::Referenced
                } else {
                    unavailable("failed to delete administrator")(err)
                }
            })
    }

    async fn auth_failure_state(&self, email: &str) -> Result<FailureState, StoreError> {
        let query = "SELECT consecutive, last_failure FROM auth_failures \
                     WHERE email = LOWER(TRIM($1))";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to read failure state"))?;
        match row {
            Some(row) => {
                let consecutive: i32 = row.try_get("consecutive").map_err(|err| {
                    unavailable("failed to decode failure state")(err)
                })?;
                Ok(FailureState {
                    consecutive: consecutive.unsigned_abs(),
                    last_failure: row.try_get("last_failure").map_err(|err| {
                        unavailable("failed to decode failure state")(err)
                    })?,
                })
            }
            None => Ok(FailureState::default()),
        }
    }

    async fn record_auth_failure(
        &self,
        email: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        let query = "INSERT INTO auth_failures (email, consecutive, last_failure) \
                     VALUES (LOWER(TRIM($1)), 1, $2) \
                     ON CONFLICT (email) DO UPDATE \
                     SET consecutive = auth_failures.consecutive + 1, \
                         last_failure = EXCLUDED.last_failure";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(email)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|_| ())
            .map_err(unavailable("failed to record auth failure"))
    }

    async fn clear_auth_failures(&self, email: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM auth_failures WHERE email = LOWER(TRIM($1))";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map(|_| ())
            .map_err(unavailable("failed to clear auth failures"))
    }
}

impl AuditLog for PgStore {
    async fn record_threat_level_change(
        &self,
        perpetrator_id: i64,
        old_level: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let query = "INSERT INTO threat_level_log \
                     (perpetrator_id, old_level, new_level, administrator_id) \
                     VALUES ($1, $2, $3, $4) RETURNING log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(perpetrator_id)
            .bind(old_level.as_db())
            .bind(new_level.as_db())
            .bind(administrator_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to append threat level entry"))?;
        Ok(row.get("log_id"))
    }

    async fn record_status_change(
        &self,
        victim_id: i64,
        old_status: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let query = "INSERT INTO status_log \
                     (victim_id, old_status, new_status, administrator_id) \
                     VALUES ($1, $2, $3, $4) RETURNING log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(victim_id)
            .bind(old_status.as_db())
            .bind(new_status.as_db())
            .bind(administrator_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to append status entry"))?;
        Ok(row.get("log_id"))
    }

    async fn threat_changes_for(
        &self,
        perpetrator_id: i64,
    ) -> Result<Vec<ThreatLevelChange>, StoreError> {
        let query = "SELECT log_id, perpetrator_id, old_level, new_level, changed_at, administrator_id \
                     FROM threat_level_log WHERE perpetrator_id = $1 \
                     ORDER BY changed_at, log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, ThreatLevelChange>(query)
            .bind(perpetrator_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to read threat level history"))
    }

    async fn status_changes_for(&self, victim_id: i64) -> Result<Vec<StatusChange>, StoreError> {
        let query = "SELECT log_id, victim_id, old_status, new_status, changed_at, administrator_id \
                     FROM status_log WHERE victim_id = $1 \
                     ORDER BY changed_at, log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, StatusChange>(query)
            .bind(victim_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to read status history"))
    }

    async fn all_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let threat_query = "SELECT log_id, perpetrator_id, old_level, new_level, changed_at, administrator_id \
                            FROM threat_level_log ORDER BY changed_at, log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = threat_query
        );
        let threat = sqlx::query_as::<_, ThreatLevelChange>(threat_query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to read threat level history"))?;

        let status_query = "SELECT log_id, victim_id, old_status, new_status, changed_at, administrator_id \
                            FROM status_log ORDER BY changed_at, log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = status_query
        );
        let status = sqlx::query_as::<_, StatusChange>(status_query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("failed to read status history"))?;

        let mut entries: Vec<AuditEntry> = threat
            .into_iter()
            .map(AuditEntry::ThreatLevel)
            .chain(status.into_iter().map(AuditEntry::Status))
            .collect();
        entries.sort_by_key(|entry| (entry.changed_at(), entry.log_id()));
        Ok(entries)
    }
}

impl TransitionStore for PgStore {
    async fn commit_threat_level(
        &self,
        perpetrator_id: i64,
        expected: ThreatLevel,
        new_level: ThreatLevel,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(unavailable("failed to begin transition transaction"))?;

        let update = "UPDATE perpetrators SET threat_level = $1 \
                      WHERE id = $2 AND threat_level = $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = update
        );
        let updated = sqlx::query(update)
            .bind(new_level.as_db())
            .bind(perpetrator_id)
            .bind(expected.as_db())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("failed to update threat level"))?;
        if updated.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(StoreError::Conflict);
        }

        let insert = "INSERT INTO threat_level_log \
                      (perpetrator_id, old_level, new_level, administrator_id) \
                      VALUES ($1, $2, $3, $4) RETURNING log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert
        );
        let row = sqlx::query(insert)
            .bind(perpetrator_id)
            .bind(expected.as_db())
            .bind(new_level.as_db())
            .bind(administrator_id)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("failed to append threat level entry"))?;

        tx.commit()
            .await
            .map_err(unavailable("failed to commit transition"))?;
        Ok(row.get("log_id"))
    }

    async fn commit_victim_status(
        &self,
        victim_id: i64,
        expected: AccountStatus,
        new_status: AccountStatus,
        administrator_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(unavailable("failed to begin transition transaction"))?;

        let update = "UPDATE victims SET status = $1 WHERE id = $2 AND status = $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = update
        );
        let updated = sqlx::query(update)
            .bind(new_status.as_db())
            .bind(victim_id)
            .bind(expected.as_db())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("failed to update victim status"))?;
        if updated.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(StoreError::Conflict);
        }

        let insert = "INSERT INTO status_log \
                      (victim_id, old_status, new_status, administrator_id) \
                      VALUES ($1, $2, $3, $4) RETURNING log_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert
        );
        let row = sqlx::query(insert)
            .bind(victim_id)
            .bind(expected.as_db())
            .bind(new_status.as_db())
            .bind(administrator_id)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("failed to append status entry"))?;

        tx.commit()
            .await
            .map_err(unavailable("failed to commit transition"))?;
        Ok(row.get("log_id"))
    }
}
